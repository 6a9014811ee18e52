//! Application settings loaded via OrthoConfig.
//!
//! Values come from CLI flags, `STARTER_*` environment variables or a config
//! file. The database is configured either by a full `database_url` or by
//! the individual `postgres_*` values.

use std::net::SocketAddr;
use std::str::FromStr;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Errors raised while turning settings into runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A required value was not provided.
    #[error("missing required setting `{key}`")]
    Missing { key: &'static str },
    /// `database_url` could not be parsed.
    #[error("invalid database URL: {message}")]
    InvalidDatabaseUrl { message: String },
    /// Host and port do not form a socket address.
    #[error("invalid bind address `{value}`")]
    InvalidBindAddress { value: String },
}

/// Server, database and logging configuration.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "STARTER")]
pub struct AppSettings {
    /// Interface to listen on.
    pub server_host: Option<String>,
    /// Port to listen on.
    pub server_port: Option<u16>,
    /// Full connection URL; takes precedence over the `postgres_*` values.
    pub database_url: Option<String>,
    /// Database name.
    pub postgres_db_name: Option<String>,
    /// Database server host.
    pub postgres_db_host: Option<String>,
    /// Database server port; the driver default when unset.
    pub postgres_db_port: Option<u16>,
    /// Role to connect as.
    pub postgres_user: Option<String>,
    /// Password for `postgres_user`.
    pub postgres_password: Option<String>,
    /// Schemas set as the search path on every connection, given as a list
    /// or one comma-separated string.
    #[serde(default, deserialize_with = "schema_list")]
    pub postgres_search_path: Option<Vec<String>>,
    /// Upper bound on pooled connections.
    pub pool_max_size: Option<u32>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    /// Human-readable logs instead of JSON.
    #[ortho_config(default = false)]
    pub development_mode: bool,
    /// Indent JSON response bodies.
    #[ortho_config(default = false)]
    pub pretty_json: bool,
    /// Send SQL as written instead of collapsing it onto one line.
    #[ortho_config(default = false)]
    pub pretty_sql: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Schemas {
    Many(Vec<String>),
    One(String),
}

fn schema_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let schemas = Option::<Schemas>::deserialize(deserializer)?.map(|schemas| match schemas {
        Schemas::Many(names) => names,
        Schemas::One(joined) => joined.split(',').map(str::to_owned).collect(),
    });
    Ok(schemas.map(|names| {
        names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }))
}

fn required<'a>(value: Option<&'a str>, key: &'static str) -> Result<&'a str, SettingsError> {
    value
        .filter(|found| !found.trim().is_empty())
        .ok_or(SettingsError::Missing { key })
}

impl AppSettings {
    /// Address the HTTP server binds to.
    ///
    /// # Errors
    ///
    /// [`SettingsError::InvalidBindAddress`] when host and port do not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        let host = self.server_host.as_deref().unwrap_or(DEFAULT_HOST);
        let port = self.server_port.unwrap_or(DEFAULT_PORT);
        let value = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        value
            .parse()
            .map_err(|_| SettingsError::InvalidBindAddress { value })
    }

    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Maximum pool size.
    pub fn pool_max_size(&self) -> u32 {
        self.pool_max_size.unwrap_or(DEFAULT_POOL_MAX_SIZE)
    }

    /// Connection options for the configured database.
    ///
    /// Every session uses UTC and, when configured, the search path.
    ///
    /// # Errors
    ///
    /// [`SettingsError::InvalidDatabaseUrl`] for an unparsable URL, or
    /// [`SettingsError::Missing`] for a required `postgres_*` value.
    pub fn connect_options(&self) -> Result<PgConnectOptions, SettingsError> {
        let options = match self.database_url.as_deref() {
            Some(url) => PgConnectOptions::from_str(url).map_err(|err| {
                SettingsError::InvalidDatabaseUrl {
                    message: err.to_string(),
                }
            })?,
            None => self.discrete_options()?,
        };
        let search_path = self.search_path();
        let mut session = vec![("timezone", "UTC")];
        if let Some(path) = search_path.as_deref() {
            session.push(("search_path", path));
        }
        Ok(options.options(session))
    }

    /// Configured schemas joined for the `search_path` session setting.
    pub fn search_path(&self) -> Option<String> {
        self.postgres_search_path
            .as_ref()
            .filter(|schemas| !schemas.is_empty())
            .map(|schemas| schemas.join(","))
    }

    fn discrete_options(&self) -> Result<PgConnectOptions, SettingsError> {
        let host = required(self.postgres_db_host.as_deref(), "postgres_db_host")?;
        let database = required(self.postgres_db_name.as_deref(), "postgres_db_name")?;
        let user = required(self.postgres_user.as_deref(), "postgres_user")?;
        required(self.search_path().as_deref(), "postgres_search_path")?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .database(database)
            .username(user)
            .ssl_mode(PgSslMode::Disable);
        if let Some(password) = self.postgres_password.as_deref() {
            options = options.password(password);
        }
        if let Some(port) = self.postgres_db_port {
            options = options.port(port);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings parsing and derived configuration.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const KEYS: [&str; 14] = [
        "STARTER_SERVER_HOST",
        "STARTER_SERVER_PORT",
        "STARTER_DATABASE_URL",
        "STARTER_POSTGRES_DB_NAME",
        "STARTER_POSTGRES_DB_HOST",
        "STARTER_POSTGRES_DB_PORT",
        "STARTER_POSTGRES_USER",
        "STARTER_POSTGRES_PASSWORD",
        "STARTER_POSTGRES_SEARCH_PATH",
        "STARTER_POOL_MAX_SIZE",
        "STARTER_LOG_LEVEL",
        "STARTER_DEVELOPMENT_MODE",
        "STARTER_PRETTY_JSON",
        "STARTER_PRETTY_SQL",
    ];

    fn load_with(overrides: &[(&str, &str)]) -> AppSettings {
        let vars = KEYS.map(|key| {
            let value = overrides
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned());
            (key, value)
        });
        let _guard = lock_env(vars);
        AppSettings::load_from_iter([OsString::from("starter")]).expect("config should load")
    }

    fn discrete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("STARTER_POSTGRES_DB_HOST", "db.internal"),
            ("STARTER_POSTGRES_DB_NAME", "app"),
            ("STARTER_POSTGRES_USER", "app_user"),
            ("STARTER_POSTGRES_SEARCH_PATH", "app,public"),
        ]
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let settings = load_with(&[]);
        assert_eq!(
            settings.bind_addr().expect("default bind address"),
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
        );
        assert_eq!(settings.log_level(), DEFAULT_LOG_LEVEL);
        assert_eq!(settings.pool_max_size(), DEFAULT_POOL_MAX_SIZE);
        assert!(!settings.development_mode);
        assert!(!settings.pretty_json);
        assert!(!settings.pretty_sql);
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let settings = load_with(&[
            ("STARTER_SERVER_HOST", "127.0.0.1"),
            ("STARTER_SERVER_PORT", "9000"),
            ("STARTER_PRETTY_JSON", "true"),
            ("STARTER_LOG_LEVEL", "debug"),
        ]);
        assert_eq!(
            settings.bind_addr().expect("bind address"),
            SocketAddr::from(([127, 0, 0, 1], 9000))
        );
        assert!(settings.pretty_json);
        assert_eq!(settings.log_level(), "debug");
    }

    #[rstest]
    fn discrete_values_build_connect_options() {
        let mut vars = discrete();
        vars.push(("STARTER_POSTGRES_DB_PORT", "6543"));
        let options = load_with(&vars).connect_options().expect("options");

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("app"));
        assert_eq!(options.get_username(), "app_user");
        let session = options.get_options().expect("session options");
        assert!(session.contains("timezone=UTC"));
        assert!(session.contains("search_path=app,public"));
    }

    #[rstest]
    #[case("app,public", Some(vec!["app", "public"]))]
    #[case("app, public ,", Some(vec!["app", "public"]))]
    #[case("public", Some(vec!["public"]))]
    fn search_path_accepts_one_or_many_schemas(
        #[case] raw: &str,
        #[case] expected: Option<Vec<&str>>,
    ) {
        let settings = load_with(&[("STARTER_POSTGRES_SEARCH_PATH", raw)]);
        let expected = expected.map(|names| names.into_iter().map(str::to_owned).collect());
        assert_eq!(settings.postgres_search_path, expected);
    }

    #[rstest]
    fn single_schema_search_path_reaches_the_session() {
        let mut vars: Vec<_> = discrete()
            .into_iter()
            .filter(|(name, _)| *name != "STARTER_POSTGRES_SEARCH_PATH")
            .collect();
        vars.push(("STARTER_POSTGRES_SEARCH_PATH", "public"));
        let options = load_with(&vars).connect_options().expect("options");
        let session = options.get_options().expect("session options");
        assert!(session.contains("search_path=public"));
    }

    #[rstest]
    #[case("STARTER_POSTGRES_DB_HOST", "postgres_db_host")]
    #[case("STARTER_POSTGRES_DB_NAME", "postgres_db_name")]
    #[case("STARTER_POSTGRES_USER", "postgres_user")]
    #[case("STARTER_POSTGRES_SEARCH_PATH", "postgres_search_path")]
    fn missing_database_value_is_reported(#[case] unset: &str, #[case] key: &'static str) {
        let vars: Vec<_> = discrete()
            .into_iter()
            .filter(|(name, _)| *name != unset)
            .collect();
        let err = load_with(&vars).connect_options().expect_err("incomplete");
        assert_eq!(err, SettingsError::Missing { key });
    }

    #[rstest]
    fn database_url_takes_precedence() {
        let options = load_with(&[(
            "STARTER_DATABASE_URL",
            "postgres://svc@pg.example:5433/reports",
        )])
        .connect_options()
        .expect("options");
        assert_eq!(options.get_host(), "pg.example");
        assert_eq!(options.get_database(), Some("reports"));
    }

    #[rstest]
    fn malformed_database_url_is_rejected() {
        let err = load_with(&[("STARTER_DATABASE_URL", "definitely not a url")])
            .connect_options()
            .expect_err("not a URL");
        assert!(matches!(err, SettingsError::InvalidDatabaseUrl { .. }));
    }

    #[rstest]
    fn bad_host_is_rejected() {
        let err = load_with(&[("STARTER_SERVER_HOST", "not a host")])
            .bind_addr()
            .expect_err("unparsable");
        assert!(matches!(err, SettingsError::InvalidBindAddress { .. }));
    }
}
