//! Command-line and environment configuration shared by the binaries.
//!
//! Every flag has an environment fallback so deployments can configure the
//! services without wrapper scripts.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cameras::{CameraDirectory, HttpCameraDirectory, StaticDirectory};
use crate::db::{self, DbConn, PartitionMode};
use crate::engine::Engine;
use crate::mailer::{LogMailer, Mailer, RelayMailer};
use crate::partition::DetectionStore;

/// Where detections live
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path to the SurrealDB (RocksDB) database
    #[arg(long, env = "TRAFFIC_DB_PATH", default_value = "data/traffic.db")]
    pub db_path: String,

    /// Partition layout of the detection rows
    #[arg(long, env = "TRAFFIC_PARTITION_MODE", value_enum, default_value_t = PartitionMode::Daily)]
    pub partition_mode: PartitionMode,

    /// Partitions scanned concurrently per request
    #[arg(long, env = "TRAFFIC_SCAN_CONCURRENCY", default_value = "8")]
    pub scan_concurrency: usize,
}

impl StoreArgs {
    /// Connect, make sure the schema exists, and open the detection store.
    pub async fn open(&self) -> Result<(DbConn, Arc<dyn DetectionStore>)> {
        let conn = db::connect(&self.db_path).await?;
        db::init_schema(&conn, self.partition_mode).await?;
        info!(path = %self.db_path, mode = ?self.partition_mode, "database opened");
        let store = db::open_store(self.partition_mode, conn.clone());
        Ok((conn, store))
    }

    pub fn engine(&self, store: Arc<dyn DetectionStore>) -> Engine {
        Engine::new(store, self.scan_concurrency)
    }
}

/// Camera registry
#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// Base URL of the camera service (district lookups)
    #[arg(long, env = "CAMERA_SERVICE_URL", default_value = "http://localhost:8002")]
    pub camera_service_url: String,

    /// URL of the camera location feed
    #[arg(long, env = "CAMERA_LOCATIONS_URL", default_value = "http://localhost:8002/cameras")]
    pub camera_locations_url: String,

    /// Load cameras and districts from a JSON file instead of the service
    #[arg(long, env = "CAMERA_FILE")]
    pub camera_file: Option<PathBuf>,

    /// Timeout for registry calls, in seconds
    #[arg(long, env = "CAMERA_TIMEOUT_SECS", default_value = "10")]
    pub camera_timeout_secs: u64,
}

impl CameraArgs {
    pub fn directory(&self) -> Result<Arc<dyn CameraDirectory>> {
        if let Some(path) = &self.camera_file {
            info!(file = %path.display(), "using static camera registry");
            return Ok(Arc::new(StaticDirectory::load(path)?));
        }
        Ok(Arc::new(HttpCameraDirectory::new(
            &self.camera_service_url,
            &self.camera_locations_url,
            Duration::from_secs(self.camera_timeout_secs),
        )?))
    }
}

/// Outbound email
#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    /// HTTP mail relay endpoint; without it emails are logged and reported as undelivered
    #[arg(long, env = "MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    /// Sender address
    #[arg(long, env = "MAIL_FROM", default_value = "traffic-stats@localhost")]
    pub mail_from: String,

    /// Timeout for relay calls, in seconds
    #[arg(long, env = "MAIL_TIMEOUT_SECS", default_value = "15")]
    pub mail_timeout_secs: u64,
}

impl MailArgs {
    pub fn relay_configured(&self) -> bool {
        self.mail_relay_url.is_some()
    }

    pub fn mailer(&self) -> Result<Arc<dyn Mailer>> {
        match &self.mail_relay_url {
            Some(url) => Ok(Arc::new(RelayMailer::new(
                url,
                &self.mail_from,
                Duration::from_secs(self.mail_timeout_secs),
            )?)),
            None => {
                warn!("MAIL_RELAY_URL not set, reports will be logged and left pending");
                Ok(Arc::new(LogMailer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        cameras: CameraArgs,
        #[command(flatten)]
        mail: MailArgs,
    }

    #[test]
    fn test_flags_parse() {
        let cli = TestCli::parse_from([
            "test",
            "--db-path",
            "/tmp/x.db",
            "--partition-mode",
            "flat",
            "--camera-file",
            "cams.json",
            "--mail-relay-url",
            "http://relay/send",
        ]);
        assert_eq!(cli.store.db_path, "/tmp/x.db");
        assert_eq!(cli.store.partition_mode, PartitionMode::Flat);
        assert_eq!(cli.cameras.camera_file, Some(PathBuf::from("cams.json")));
        assert_eq!(cli.mail.mail_relay_url.as_deref(), Some("http://relay/send"));
        assert!(cli.mail.relay_configured());
    }
}
