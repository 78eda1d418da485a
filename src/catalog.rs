//! Database kinds the engine knows how to recognise, with their connection
//! defaults and container detection rules.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

type PostProcess = fn(Credentials, &HashMap<String, String>) -> Credentials;

/// How to spot a database in a container and pull credentials out of its
/// environment. Each `*_vars` list is tried in order; the first present
/// variable wins.
#[derive(Debug)]
pub struct DockerDetector {
    pub image_patterns: &'static [&'static str],
    pub user_vars: &'static [&'static str],
    pub password_vars: &'static [&'static str],
    pub database_vars: &'static [&'static str],
    pub default_user: Option<&'static str>,
    pub default_database: Option<&'static str>,
    pub preferred_host: &'static str,
    pub default_user_requires_password: bool,
    pub post_process: Option<PostProcess>,
}

impl DockerDetector {
    pub fn credentials(&self, env: &HashMap<String, String>) -> Credentials {
        let first = |keys: &[&str]| keys.iter().find_map(|k| env.get(*k).cloned());

        let mut user = first(self.user_vars);
        let password = first(self.password_vars);
        let database = first(self.database_vars)
            .filter(|d| !d.is_empty())
            .or_else(|| self.default_database.map(str::to_string))
            .filter(|d| !d.is_empty());

        let user_missing = user.as_deref().is_none_or(str::is_empty);
        if user_missing {
            if let Some(default) = self.default_user {
                if !self.default_user_requires_password || password.is_some() {
                    user = Some(default.to_string());
                }
            }
        }

        let creds = Credentials {
            user,
            password,
            database,
        };
        match self.post_process {
            Some(f) => f(creds, env),
            None => creds,
        }
    }
}

#[derive(Debug)]
pub struct DbKind {
    pub db_type: &'static str,
    pub display_name: &'static str,
    pub default_port: u16,
    pub requires_auth: bool,
    pub docker: Option<DockerDetector>,
}

const fn detector(
    image_patterns: &'static [&'static str],
    user_vars: &'static [&'static str],
    password_vars: &'static [&'static str],
    database_vars: &'static [&'static str],
    default_user: Option<&'static str>,
) -> DockerDetector {
    DockerDetector {
        image_patterns,
        user_vars,
        password_vars,
        database_vars,
        default_user,
        default_database: None,
        preferred_host: "localhost",
        default_user_requires_password: false,
        post_process: None,
    }
}

fn mysql_root_fallback(creds: Credentials, env: &HashMap<String, String>) -> Credentials {
    let root_allowed = ["MYSQL_ALLOW_EMPTY_PASSWORD", "MYSQL_RANDOM_ROOT_PASSWORD"]
        .iter()
        .any(|k| env.get(*k).is_some_and(|v| !v.is_empty()));
    if creds.user.as_deref().is_none_or(str::is_empty) && root_allowed {
        return Credentials {
            user: Some("root".into()),
            ..creds
        };
    }
    creds
}

fn oracle_app_user(creds: Credentials, env: &HashMap<String, String>) -> Credentials {
    let mut creds = creds;
    let app_user = env.get("APP_USER").filter(|v| !v.is_empty());
    let app_password = env.get("APP_USER_PASSWORD").filter(|v| !v.is_empty());
    if app_user.is_some() && app_password.is_none() {
        creds.user = Some("SYSTEM".into());
        creds.password = env.get("ORACLE_PASSWORD").cloned();
    }
    // ORACLE_DATABASE may list several PDBs.
    if let Some(db) = creds.database.as_deref() {
        if let Some((first, _)) = db.split_once(',') {
            creds.database = Some(first.to_string());
        }
    }
    creds
}

pub static KINDS: &[DbKind] = &[
    DbKind {
        db_type: "postgresql",
        display_name: "PostgreSQL",
        default_port: 5432,
        requires_auth: true,
        docker: Some(detector(
            &["*postgres*"],
            &["POSTGRES_USER"],
            &["POSTGRES_PASSWORD"],
            &["POSTGRES_DB"],
            Some("postgres"),
        )),
    },
    DbKind {
        db_type: "mariadb",
        display_name: "MariaDB",
        default_port: 3306,
        requires_auth: true,
        docker: Some(DockerDetector {
            default_user_requires_password: true,
            preferred_host: "127.0.0.1",
            post_process: Some(mysql_root_fallback),
            ..detector(
                &["*mariadb*"],
                &["MARIADB_USER", "MYSQL_USER"],
                &[
                    "MARIADB_PASSWORD",
                    "MARIADB_ROOT_PASSWORD",
                    "MYSQL_PASSWORD",
                    "MYSQL_ROOT_PASSWORD",
                ],
                &["MARIADB_DATABASE", "MYSQL_DATABASE"],
                Some("root"),
            )
        }),
    },
    DbKind {
        db_type: "mysql",
        display_name: "MySQL",
        default_port: 3306,
        requires_auth: true,
        docker: Some(DockerDetector {
            default_user_requires_password: true,
            preferred_host: "127.0.0.1",
            post_process: Some(mysql_root_fallback),
            ..detector(
                &["*mysql*"],
                &["MYSQL_USER"],
                &["MYSQL_PASSWORD", "MYSQL_ROOT_PASSWORD"],
                &["MYSQL_DATABASE"],
                Some("root"),
            )
        }),
    },
    DbKind {
        db_type: "mssql",
        display_name: "SQL Server",
        default_port: 1433,
        requires_auth: true,
        docker: Some(detector(
            &["*mcr.microsoft.com/mssql*"],
            &[],
            &["SA_PASSWORD", "MSSQL_SA_PASSWORD"],
            &[],
            Some("sa"),
        )),
    },
    DbKind {
        db_type: "oracle",
        display_name: "Oracle",
        default_port: 1521,
        requires_auth: true,
        docker: Some(DockerDetector {
            default_database: Some("FREEPDB1"),
            post_process: Some(oracle_app_user),
            ..detector(
                &["*gvenzl/oracle-free*", "*oracle/database*"],
                &["APP_USER"],
                &["APP_USER_PASSWORD", "ORACLE_PASSWORD"],
                &["ORACLE_DATABASE"],
                Some("SYSTEM"),
            )
        }),
    },
    DbKind {
        db_type: "clickhouse",
        display_name: "ClickHouse",
        default_port: 8123,
        requires_auth: false,
        docker: Some(detector(
            &["*clickhouse*"],
            &["CLICKHOUSE_USER"],
            &["CLICKHOUSE_PASSWORD"],
            &["CLICKHOUSE_DB"],
            Some("default"),
        )),
    },
    DbKind {
        db_type: "cockroachdb",
        display_name: "CockroachDB",
        default_port: 26257,
        requires_auth: false,
        docker: Some(detector(
            &["*cockroachdb*"],
            &["COCKROACH_USER"],
            &["COCKROACH_PASSWORD"],
            &["COCKROACH_DATABASE"],
            Some("root"),
        )),
    },
    DbKind {
        db_type: "firebird",
        display_name: "Firebird",
        default_port: 3050,
        requires_auth: true,
        docker: Some(detector(
            &["*firebirdsql/firebird*"],
            &["FIREBIRD_USER"],
            &["FIREBIRD_PASSWORD"],
            &["FIREBIRD_DATABASE"],
            Some("SYSDBA"),
        )),
    },
    DbKind {
        db_type: "turso",
        display_name: "Turso",
        default_port: 8080,
        requires_auth: false,
        docker: Some(detector(
            &["*tursodatabase/libsql-server*"],
            &[],
            &[],
            &[],
            None,
        )),
    },
    DbKind {
        db_type: "redshift",
        display_name: "Amazon Redshift",
        default_port: 5439,
        requires_auth: true,
        docker: None,
    },
];

/// Translate a `*`/`?` glob into an anchored, case-insensitive regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

static IMAGE_MATCHERS: LazyLock<Vec<(&'static DbKind, Regex)>> = LazyLock::new(|| {
    KINDS
        .iter()
        .filter_map(|k| k.docker.as_ref().map(|d| (k, d)))
        .flat_map(|(k, d)| {
            d.image_patterns
                .iter()
                .filter_map(move |p| glob_to_regex(p).ok().map(|re| (k, re)))
        })
        .collect()
});

pub fn kind(db_type: &str) -> Option<&'static DbKind> {
    KINDS.iter().find(|k| k.db_type == db_type)
}

pub fn display_name(db_type: &str) -> String {
    kind(db_type)
        .map(|k| k.display_name.to_string())
        .unwrap_or_else(|| db_type.to_uppercase())
}

pub fn default_port(db_type: &str) -> Option<u16> {
    kind(db_type).map(|k| k.default_port)
}

/// First catalog kind whose image patterns match `image`.
pub fn kind_for_image(image: &str) -> Option<&'static DbKind> {
    IMAGE_MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(image))
        .map(|(k, _)| *k)
}
