//! Database objects through the `mysql` command-line client
//!
//! Runs as the invoking user; root credentials come from `/root/.my.cnf`,
//! which the node component manages.

use anyhow::{Context, Result, bail};
use declarative::DatabaseAdmin;
use std::collections::BTreeSet;

use super::SystemHost;
use crate::runner;

/// Path to the client binary
#[derive(Debug)]
pub struct Client {
    binary: String,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            binary: "mysql".to_string(),
        }
    }
}

impl Client {
    /// Run one statement in batch mode and return its rows
    fn query(&self, sql: &str) -> Result<Vec<String>> {
        let out = runner::output(&self.binary, &["-NBe", sql])?;
        if !out.success {
            bail!("mysql: {}", out.stderr_str().trim());
        }
        Ok(out.stdout_str().lines().map(str::to_string).collect())
    }

    fn execute(&self, sql: &str) -> Result<()> {
        log::debug!("mysql: {}", redact(sql));
        self.query(sql).map(|_| ())
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let rows = self.query(sql)?;
        let first = rows.first().map_or("0", String::as_str);
        first
            .trim()
            .parse()
            .with_context(|| format!("mysql returned {first:?} for a count"))
    }
}

impl DatabaseAdmin for SystemHost {
    fn database_exists(&self, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
            literal(name)
        );
        Ok(self.mysql.count(&sql)? > 0)
    }

    fn create_database(&self, name: &str, charset: &str) -> Result<()> {
        self.mysql.execute(&format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET {}",
            identifier(name),
            identifier(charset)
        ))
    }

    fn drop_database(&self, name: &str) -> Result<()> {
        self.mysql
            .execute(&format!("DROP DATABASE IF EXISTS {}", identifier(name)))
    }

    fn user_matches(&self, account: &str, password: &str) -> Result<Option<bool>> {
        let (user, host) = split_account(account)?;
        let filter = format!("User = {} AND Host = {}", literal(user), literal(host));
        if self
            .mysql
            .count(&format!("SELECT COUNT(*) FROM mysql.user WHERE {filter}"))?
            == 0
        {
            return Ok(None);
        }
        let matching = self.mysql.count(&format!(
            "SELECT COUNT(*) FROM mysql.user WHERE {filter} AND Password = PASSWORD({})",
            literal(password)
        ))?;
        Ok(Some(matching > 0))
    }

    fn ensure_user(&self, account: &str, password: &str) -> Result<()> {
        let quoted = quote_account(account)?;
        let sql = if self.user_matches(account, password)?.is_some() {
            format!("SET PASSWORD FOR {quoted} = PASSWORD({})", literal(password))
        } else {
            format!("CREATE USER {quoted} IDENTIFIED BY {}", literal(password))
        };
        self.mysql.execute(&sql)
    }

    fn drop_user(&self, account: &str) -> Result<()> {
        if self.user_matches(account, "")?.is_none() {
            return Ok(());
        }
        self.mysql
            .execute(&format!("DROP USER {}", quote_account(account)?))
    }

    fn grant_matches(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<bool> {
        if self.user_matches(account, "")?.is_none() {
            return Ok(false);
        }
        let rows = self
            .mysql
            .query(&format!("SHOW GRANTS FOR {}", quote_account(account)?))?;
        let wanted = normalize(privileges);
        Ok(rows
            .iter()
            .filter_map(|row| parse_grant(row))
            .any(|g| g.table == table && g.privileges == wanted && g.grant_option == grant_option))
    }

    fn ensure_grant(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<()> {
        let quoted = quote_account(account)?;
        let on = quote_table(table);
        // replace rather than add to an existing grant on the same table
        for revoke in ["ALL PRIVILEGES", "GRANT OPTION"] {
            if let Err(e) = self
                .mysql
                .execute(&format!("REVOKE {revoke} ON {on} FROM {quoted}"))
            {
                log::debug!("nothing to revoke on {table} for {account}: {e}");
            }
        }
        let mut sql = format!(
            "GRANT {} ON {on} TO {quoted}",
            normalize(privileges).into_iter().collect::<Vec<_>>().join(", ")
        );
        if grant_option {
            sql.push_str(" WITH GRANT OPTION");
        }
        self.mysql.execute(&sql)
    }
}

/// One row of `SHOW GRANTS`
#[derive(Debug, PartialEq, Eq)]
struct Grant {
    privileges: BTreeSet<String>,
    table: String,
    grant_option: bool,
}

fn parse_grant(row: &str) -> Option<Grant> {
    let rest = row.trim().strip_prefix("GRANT ")?;
    let (privileges, rest) = rest.split_once(" ON ")?;
    let (table, _) = rest.split_once(" TO ")?;
    let privileges: Vec<String> = privileges.split(',').map(str::to_string).collect();
    Some(Grant {
        privileges: normalize(&privileges),
        table: table.replace('`', ""),
        grant_option: row.trim_end().ends_with(" WITH GRANT OPTION"),
    })
}

/// Upper-case privilege names, with `ALL` spelled out
fn normalize(privileges: &[String]) -> BTreeSet<String> {
    privileges
        .iter()
        .map(|p| match p.trim().to_uppercase().as_str() {
            "ALL" => "ALL PRIVILEGES".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// `user@host`, split at the last `@`
fn split_account(account: &str) -> Result<(&str, &str)> {
    account
        .rsplit_once('@')
        .with_context(|| format!("account '{account}' must be written user@host"))
}

fn quote_account(account: &str) -> Result<String> {
    let (user, host) = split_account(account)?;
    Ok(format!("{}@{}", literal(user), literal(host)))
}

/// `db.*` as `` `db`.* ``; `*.*` stays as is
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| if part == "*" { part.to_string() } else { identifier(part) })
        .collect::<Vec<_>>()
        .join(".")
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Statement text up to the first password
fn redact(sql: &str) -> &str {
    [" IDENTIFIED BY ", " = PASSWORD("]
        .iter()
        .find_map(|marker| sql.find(marker))
        .map_or(sql, |at| &sql[..at])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privs(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_grant_rows() {
        let row = "GRANT ALL PRIVILEGES ON `app`.* TO 'app'@'localhost' IDENTIFIED BY PASSWORD '*ABC'";
        assert_eq!(
            parse_grant(row),
            Some(Grant {
                privileges: privs(&["ALL PRIVILEGES"]),
                table: "app.*".into(),
                grant_option: false,
            })
        );

        let row = "GRANT SELECT, RELOAD, SHUTDOWN ON *.* TO 'debian-sys-maint'@'localhost' WITH GRANT OPTION";
        let grant = parse_grant(row).unwrap();
        assert_eq!(grant.privileges, privs(&["RELOAD", "SELECT", "SHUTDOWN"]));
        assert_eq!(grant.table, "*.*");
        assert!(grant.grant_option);

        assert_eq!(parse_grant("not a grant"), None);
    }

    #[test]
    fn test_normalize_spells_out_all() {
        let list = vec!["all".to_string(), " select".to_string()];
        assert_eq!(normalize(&list), privs(&["ALL PRIVILEGES", "SELECT"]));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_account("app@%").unwrap(), "'app'@'%'");
        assert_eq!(quote_account("o'brien@db@host").unwrap(), "'o''brien@db'@'host'");
        assert!(quote_account("nohost").is_err());
        assert_eq!(quote_table("app.*"), "`app`.*");
        assert_eq!(quote_table("*.*"), "*.*");
        assert_eq!(identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_redact_hides_passwords() {
        let sql = "CREATE USER 'app'@'%' IDENTIFIED BY 'hunter2'";
        assert_eq!(redact(sql), "CREATE USER 'app'@'%'");
        let sql = "SET PASSWORD FOR 'a'@'h' = PASSWORD('it''s')";
        assert_eq!(redact(sql), "SET PASSWORD FOR 'a'@'h'");
        assert_eq!(redact("DROP USER 'a'@'h'"), "DROP USER 'a'@'h'");
    }
}
