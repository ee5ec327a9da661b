use thiserror::Error;

/// Parse failure for a driver DSN.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DsnError {
    /// The DSN has no `/` separating the database name.
    #[error("invalid DSN: missing the '/' separating the database name")]
    MissingDatabase,
    /// The DSN opens a `(` address block that never closes.
    #[error("invalid DSN: address block is not terminated with ')'")]
    UnterminatedAddress,
}

/// A MySQL-driver DSN of the form
/// `[user[:password]@][net[(addr)]]/dbname[?params]`, decomposed.
///
/// [`Dsn::redacted`] renders it back without the password, which is the
/// only form the plugin ever attaches to telemetry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dsn {
    /// Username, possibly empty.
    pub user: String,
    /// Password as parsed; never rendered by [`Dsn::redacted`].
    pub password: String,
    /// Driver network name (`tcp`, `unix`, ...); defaults to `tcp`.
    pub net: String,
    /// Server address; defaults to the driver's localhost address for tcp.
    pub addr: String,
    /// Database (schema) name.
    pub database: String,
    /// Raw query parameters, if any.
    pub params: Option<String>,
}

impl Dsn {
    /// Parses a DSN string.
    pub fn parse(s: &str) -> Result<Dsn, DsnError> {
        // The password and the address may both contain '/',
        // so the database separator is the last one.
        let slash = s.rfind('/').ok_or(DsnError::MissingDatabase)?;
        let (head, tail) = (&s[..slash], &s[slash + 1..]);

        let (database, params) = match tail.split_once('?') {
            Some((database, params)) => (database.to_owned(), Some(params.to_owned())),
            None => (tail.to_owned(), None),
        };

        let (credentials, endpoint) = match head.rfind('@') {
            Some(at) => (&head[..at], &head[at + 1..]),
            None => ("", head),
        };
        let (user, password) = match credentials.split_once(':') {
            Some((user, password)) => (user.to_owned(), password.to_owned()),
            None => (credentials.to_owned(), String::new()),
        };

        let (mut net, mut addr) = match endpoint.find('(') {
            Some(open) => {
                if !endpoint.ends_with(')') {
                    return Err(DsnError::UnterminatedAddress);
                }
                (
                    endpoint[..open].to_owned(),
                    endpoint[open + 1..endpoint.len() - 1].to_owned(),
                )
            }
            None => (endpoint.to_owned(), String::new()),
        };
        if net.is_empty() {
            net = "tcp".to_owned();
        }
        if addr.is_empty() {
            addr = match net.as_str() {
                "tcp" => "127.0.0.1:3306".to_owned(),
                "unix" => "/tmp/mysql.sock".to_owned(),
                _ => addr,
            };
        }

        Ok(Dsn {
            user,
            password,
            net,
            addr,
            database,
            params,
        })
    }

    /// Renders the DSN with the password removed and everything else kept.
    pub fn redacted(&self) -> String {
        let mut out = String::new();
        if !self.user.is_empty() {
            out.push_str(&self.user);
            out.push('@');
        }
        out.push_str(&self.net);
        out.push('(');
        out.push_str(&self.addr);
        out.push(')');
        out.push('/');
        out.push_str(&self.database);
        if let Some(params) = &self.params {
            out.push('?');
            out.push_str(params);
        }
        out
    }
}
