use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::service::matcher::MatchStrategy;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageKind,
    pub recon: ReconSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

/// 存储后端: Postgres 或进程内存 (开发/测试)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Postgres,
    Memory,
}

/// Postgres 单条语句最多 65535 个绑定参数, 每条报表行占 18 个
pub const MAX_INSERT_BATCH_SIZE: usize = 65_535 / 18;

/// 对账引擎参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconSettings {
    /// 并行匹配线程数
    pub match_workers: usize,
    /// 报表行批量写入的分块大小
    pub insert_batch_size: usize,
    /// 候选发票窗口: 期间首日往前推的天数
    pub candidate_lookback_days: i64,
    /// 候选发票窗口: 期间末日往后推的天数
    pub candidate_lookahead_days: i64,
    pub strategy: MatchStrategy,
}

impl Default for ReconSettings {
    fn default() -> Self {
        Self {
            match_workers: 4,
            insert_batch_size: 1000,
            candidate_lookback_days: 180,
            candidate_lookahead_days: 15,
            strategy: MatchStrategy::FirstMatch,
        }
    }
}

impl ReconSettings {
    /// 实际使用的分块大小, 限制在 [1, MAX_INSERT_BATCH_SIZE]
    pub fn insert_chunk_size(&self) -> usize {
        self.insert_batch_size.clamp(1, MAX_INSERT_BATCH_SIZE)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/tax_itc_recon".to_string(),
                max_connections: 20,
                run_migrations: true,
            },
            storage: StorageKind::Postgres,
            recon: ReconSettings::default(),
        }
    }
}

impl AppConfig {
    /// 加载顺序: 默认值 -> recon.toml (可选) -> RECON__* 环境变量 -> DATABASE_URL/SERVER_HOST/SERVER_PORT
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(File::with_name("recon").required(false))
    }

    pub fn load_from<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = AppConfig::default();
        let port: Option<i64> = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok());

        Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
            .set_default("database.run_migrations", defaults.database.run_migrations)?
            .set_default("storage", "postgres")?
            .set_default("recon.match_workers", defaults.recon.match_workers as i64)?
            .set_default("recon.insert_batch_size", defaults.recon.insert_batch_size as i64)?
            .set_default("recon.candidate_lookback_days", defaults.recon.candidate_lookback_days)?
            .set_default("recon.candidate_lookahead_days", defaults.recon.candidate_lookahead_days)?
            .set_default("recon.strategy", "first_match")?
            .add_source(file)
            .add_source(Environment::with_prefix("RECON").separator("__"))
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", port)?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            storage = "memory"

            [recon]
            match_workers = 8
            strategy = "best_score"
        "#;
        let cfg = AppConfig::load_from(File::from_str(toml, FileFormat::Toml)).unwrap();
        assert_eq!(cfg.storage, StorageKind::Memory);
        assert_eq!(cfg.recon.match_workers, 8);
        assert_eq!(cfg.recon.strategy, MatchStrategy::BestScore);
        assert_eq!(cfg.recon.insert_batch_size, 1000);
    }

    #[test]
    fn insert_chunk_size_stays_within_bind_limit() {
        let mut settings = ReconSettings::default();
        assert_eq!(settings.insert_chunk_size(), 1000);

        settings.insert_batch_size = 10_000;
        assert_eq!(settings.insert_chunk_size(), 3640);
        assert!(settings.insert_chunk_size() * 18 <= 65_535);

        settings.insert_batch_size = 0;
        assert_eq!(settings.insert_chunk_size(), 1);
    }
}
