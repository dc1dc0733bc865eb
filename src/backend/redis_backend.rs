//! Redis backend
//!
//! One synchronous connection per client, opened once and never re-established.
//! Each trait call maps to a single Redis command; the counter uses `INCRBY`
//! so concurrent writers never lose an increment.

use redis::{Commands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::time::Duration;
use tracing::{debug, info};

use super::KvBackend;
use crate::config::RedisSettings;
use crate::error::{AppResult, EpocError};

/// Time allowed for the initial TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to one Redis database index.
pub struct RedisBackend {
    connection: redis::Connection,
    host: String,
    port: u16,
    db: i64,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .finish()
    }
}

impl RedisBackend {
    /// Connect and ping. Any failure is reported as `EpocError::Connection`.
    pub fn connect(settings: &RedisSettings) -> AppResult<Self> {
        let connection_error = |source| EpocError::Connection {
            host: settings.host.clone(),
            port: settings.port,
            source,
        };

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: RedisConnectionInfo {
                db: settings.db,
                password: settings.token.clone(),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info).map_err(connection_error)?;
        let mut connection = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(connection_error)?;
        redis::cmd("PING")
            .query::<String>(&mut connection)
            .map_err(connection_error)?;

        info!(
            "Connected to redis://{}:{}/{}",
            settings.host, settings.port, settings.db
        );
        Ok(Self {
            connection,
            host: settings.host.clone(),
            port: settings.port,
            db: settings.db,
        })
    }
}

impl KvBackend for RedisBackend {
    fn describe(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    fn ping(&mut self) -> AppResult<()> {
        redis::cmd("PING").query::<String>(&mut self.connection)?;
        Ok(())
    }

    fn get(&mut self, key: &str) -> AppResult<Option<Vec<u8>>> {
        debug!("GET {}", key);
        Ok(self.connection.get(key)?)
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        debug!("SET {} {}", key, value);
        self.connection.set::<_, _, ()>(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> AppResult<()> {
        debug!("DEL {}", key);
        self.connection.del::<_, ()>(key)?;
        Ok(())
    }

    fn incr(&mut self, key: &str, by: i64) -> AppResult<i64> {
        debug!("INCRBY {} {}", key, by);
        Ok(self.connection.incr(key, by)?)
    }

    fn list_range(&mut self, key: &str) -> AppResult<Vec<Vec<u8>>> {
        debug!("LRANGE {} 0 -1", key);
        Ok(self.connection.lrange(key, 0, -1)?)
    }

    fn list_push(&mut self, key: &str, value: &str) -> AppResult<()> {
        debug!("RPUSH {} {}", key, value);
        self.connection.rpush::<_, _, ()>(key, value)?;
        Ok(())
    }

    fn flush_db(&mut self) -> AppResult<()> {
        info!("FLUSHDB on {}", self.describe());
        redis::cmd("FLUSHDB").query::<()>(&mut self.connection)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_server_is_connection_error() {
        let settings = RedisSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            token: None,
            db: 0,
        };
        let err = RedisBackend::connect(&settings).unwrap_err();
        assert!(matches!(
            err,
            EpocError::Connection { ref host, port: 1, .. } if host == "127.0.0.1"
        ));
        assert_eq!(err.to_string(), "Could not connect to server: 127.0.0.1:1");
    }
}
