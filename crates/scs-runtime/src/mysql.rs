use crate::backend::SqlBackend;
use crate::{redact, BackendError};
use scs_schema::SqlSection;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// MySQL/MariaDB administration through the `mysql` command-line client.
///
/// Statements are fed on stdin and the admin password travels in
/// `MYSQL_PWD`, so neither shows up in the process table.
pub struct MysqlCliBackend {
    section: SqlSection,
    program: String,
}

/// Database and user names come from machine names in identifier form, but
/// are checked again here because they are interpolated into SQL.
fn check_identifier(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(BackendError::request(
            "validate identifier",
            format!("'{name}' is not a safe SQL identifier"),
        ))
    }
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

impl MysqlCliBackend {
    pub fn new(section: SqlSection) -> Self {
        Self {
            section,
            program: "mysql".to_owned(),
        }
    }

    /// Use a different client binary (e.g. `mariadb`).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, operation: &str, sql: &str, secrets: &[&str]) -> Result<String, BackendError> {
        debug!("mysql: {operation}");
        let mut child = Command::new(&self.program)
            .arg("--batch")
            .arg("--skip-column-names")
            .arg("-h")
            .arg(&self.section.host)
            .arg("-P")
            .arg(self.section.port.to_string())
            .arg("-u")
            .arg(&self.section.admin_user)
            .env("MYSQL_PWD", &self.section.admin_password)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::request(operation, format!("spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(sql.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let mut all_secrets = vec![self.section.admin_password.as_str()];
        all_secrets.extend_from_slice(secrets);

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BackendError::request(
                operation,
                redact(
                    &format!("{}: {}", output.status, stderr.trim()),
                    &all_secrets,
                ),
            ))
        }
    }
}

impl SqlBackend for MysqlCliBackend {
    fn name(&self) -> &'static str {
        "mysql-cli"
    }

    fn database_exists(&self, database: &str) -> Result<bool, BackendError> {
        check_identifier(database)?;
        let out = self.run(
            &format!("look up database {database}"),
            &format!(
                "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = {};",
                sql_string(database)
            ),
            &[],
        )?;
        Ok(out.lines().any(|l| l.trim() == database))
    }

    fn create_database(&self, database: &str) -> Result<(), BackendError> {
        check_identifier(database)?;
        self.run(
            &format!("create database {database}"),
            &format!("CREATE DATABASE `{database}` CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci;"),
            &[],
        )?;
        info!("created database {database}");
        Ok(())
    }

    fn delete_database(&self, database: &str) -> Result<(), BackendError> {
        check_identifier(database)?;
        self.run(
            &format!("drop database {database}"),
            &format!("DROP DATABASE IF EXISTS `{database}`;"),
            &[],
        )?;
        info!("dropped database {database}");
        Ok(())
    }

    fn create_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError> {
        check_identifier(user)?;
        check_identifier(database)?;
        let host = sql_string(&self.section.user_host);
        let sql = format!(
            "CREATE USER IF NOT EXISTS {u}@{host} IDENTIFIED BY {p};\n\
             GRANT ALL PRIVILEGES ON `{database}`.* TO {u}@{host};\n\
             FLUSH PRIVILEGES;",
            u = sql_string(user),
            p = sql_string(password),
        );
        self.run(&format!("create user {user}"), &sql, &[password])?;
        info!("created user {user} on {database}");
        Ok(())
    }

    fn reset_user(&self, user: &str, password: &str, database: &str) -> Result<(), BackendError> {
        check_identifier(user)?;
        check_identifier(database)?;
        let host = sql_string(&self.section.user_host);
        let sql = format!(
            "CREATE USER IF NOT EXISTS {u}@{host} IDENTIFIED BY {p};\n\
             ALTER USER {u}@{host} IDENTIFIED BY {p};\n\
             GRANT ALL PRIVILEGES ON `{database}`.* TO {u}@{host};\n\
             FLUSH PRIVILEGES;",
            u = sql_string(user),
            p = sql_string(password),
        );
        self.run(&format!("reset user {user}"), &sql, &[password])?;
        info!("reset password of user {user} on {database}");
        Ok(())
    }

    fn delete_user(&self, user: &str) -> Result<(), BackendError> {
        check_identifier(user)?;
        let sql = format!(
            "DROP USER IF EXISTS {}@{};\nFLUSH PRIVILEGES;",
            sql_string(user),
            sql_string(&self.section.user_host)
        );
        self.run(&format!("drop user {user}"), &sql, &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> SqlSection {
        SqlSection {
            driver: "cli".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 3306,
            admin_user: "root".to_owned(),
            admin_password: "adminpw".to_owned(),
            user_host: "%".to_owned(),
        }
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(check_identifier("demo_sql").is_ok());
        assert!(check_identifier("demo-sql").is_err());
        assert!(check_identifier("x`; DROP DATABASE y; --").is_err());
        assert!(check_identifier("").is_err());
    }

    #[test]
    fn sql_string_escapes_quotes() {
        assert_eq!(sql_string("it's"), "'it''s'");
        assert_eq!(sql_string("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn rejects_unsafe_name_without_spawning() {
        let backend = MysqlCliBackend::new(section()).with_program("/nonexistent/mysql");
        let err = backend.create_database("bad name").unwrap_err();
        assert!(err.to_string().contains("safe SQL identifier"));
    }

    #[test]
    fn missing_client_is_request_error() {
        let backend = MysqlCliBackend::new(section()).with_program("/nonexistent/mysql");
        let err = backend.create_database("demo_sql").unwrap_err();
        assert!(matches!(err, BackendError::Request { .. }));
        assert!(err.to_string().contains("spawn"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_client_output_is_redacted() {
        // `sh -c` stands in for the client: it echoes the password to stderr
        // and exits non-zero.
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-mysql");
        std::fs::write(
            &fake,
            "#!/bin/sh\ncat >/dev/null\necho \"denied for $MYSQL_PWD\" >&2\nexit 1\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let backend =
            MysqlCliBackend::new(section()).with_program(fake.to_string_lossy().into_owned());
        let err = backend
            .create_user("demo_sql", "userpw", "demo_sql")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("denied for ***"));
        assert!(!msg.contains("adminpw"));
        assert!(!msg.contains("userpw"));
    }
}
