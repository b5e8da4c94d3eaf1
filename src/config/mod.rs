//! 分页服务配置模块
//!
//! 该模块负责：
//! - 配置文件加载和解析（单文件或 `base.toml` + `overrides/*.toml` 目录）
//! - 环境特定配置与环境变量覆盖
//! - 分页、MongoDB、日志配置定义
//!
//! 加载结果按值返回，由调用方显式传给需要它的组件。

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::{debug, warn};

mod manager;
pub use manager::ConfigManager;

/// 分页配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PaginationConfig {
    /// 未指定 `limit` 时的页大小
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// 页大小上限
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// 全文检索单页最大条数
    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,
}

fn default_page_size() -> usize {
    crate::pagination::DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    100
}

fn default_search_max_results() -> usize {
    10
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            search_max_results: default_search_max_results(),
        }
    }
}

/// MongoDB 实例配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct MongoInstanceConfig {
    /// MongoDB 连接 URL
    pub url: String,
    /// 数据库名称
    #[serde(default)]
    pub database: Option<String>,
}

impl MongoInstanceConfig {
    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or("kogo")
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct PaginationAppConfig {
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub mongodb: Option<MongoInstanceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PaginationAppConfig {
    /// 修正不合法的取值
    fn ensure_defaults(&mut self) {
        if self.pagination.max_page_size == 0 {
            self.pagination.max_page_size = default_max_page_size();
        }
        if self.pagination.default_page_size == 0 {
            self.pagination.default_page_size = default_page_size();
        }
        if self.pagination.default_page_size > self.pagination.max_page_size {
            self.pagination.default_page_size = self.pagination.max_page_size;
        }
        if self.pagination.search_max_results == 0 {
            self.pagination.search_max_results = default_search_max_results();
        }
    }
}

/// 加载配置
///
/// 依次尝试指定路径、`config` 目录、`config.toml`，全部失败时使用默认配置；
/// 最后叠加环境配置文件与环境变量。
pub fn load_config(path: Option<&str>) -> PaginationAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    let mut cfg = load_with_fallback(&candidates);
    if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
        warn!("failed to load environment config: {}", e);
    }
    ConfigManager::apply_env_overrides(&mut cfg);
    cfg.ensure_defaults();
    cfg
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> PaginationAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    PaginationAppConfig::default()
}

/// 从源加载配置
pub fn load_config_from_source(path: &Path) -> Result<PaginationAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let mut cfg = if metadata.is_dir() {
        load_config_from_directory(path)?
    } else {
        load_config_from_file(path)?
    };
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<PaginationAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: PaginationAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置：`base.toml` 之上按文件名顺序叠加 `overrides/*.toml`
fn load_config_from_directory(path: &Path) -> Result<PaginationAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = read_fragment(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    apply_override_fragments(&mut merged, &path.join("overrides"))?;

    let cfg: PaginationAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 按文件名顺序叠加 `overrides/` 下的 `*.toml` 片段；目录不存在时不做任何事
fn apply_override_fragments(merged: &mut Value, overrides_dir: &Path) -> Result<()> {
    if !overrides_dir.is_dir() {
        return Ok(());
    }

    let mut fragments: Vec<PathBuf> = fs::read_dir(overrides_dir)
        .with_context(|| {
            format!(
                "unable to list pagination config overrides in {}",
                overrides_dir.display()
            )
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        })
        .collect();
    fragments.sort();

    for fragment in fragments {
        overlay_value(merged, read_fragment(&fragment)?);
        debug!(fragment = %fragment.display(), "Applied pagination config override");
    }

    Ok(())
}

/// 读取单个配置片段
fn read_fragment(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read pagination config {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid pagination config {}", path.display()))
}

/// 表按键递归合并，其余值整体覆盖
fn overlay_value(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Table(target_table), Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match target_table.get_mut(&key) {
                    Some(existing) => overlay_value(existing, value),
                    None => {
                        target_table.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kogo-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = scratch_dir();
        let file = dir.join("config.toml");
        fs::write(
            &file,
            r#"
            [pagination]
            default_page_size = 20

            [mongodb]
            url = "mongodb://localhost:27017"
            database = "forum"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let cfg = load_config_from_source(&file).unwrap();
        assert_eq!(cfg.pagination.default_page_size, 20);
        assert_eq!(cfg.pagination.max_page_size, 100);
        assert_eq!(cfg.mongodb.as_ref().unwrap().database_name(), "forum");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.with_target);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_config_from_directory_with_overrides() {
        let dir = scratch_dir();
        fs::write(
            dir.join("base.toml"),
            "[pagination]\ndefault_page_size = 10\nmax_page_size = 50\n",
        )
        .unwrap();
        fs::create_dir_all(dir.join("overrides")).unwrap();
        fs::write(
            dir.join("overrides").join("10-page.toml"),
            "[pagination]\nmax_page_size = 30\n",
        )
        .unwrap();
        fs::write(dir.join("overrides").join("notes.txt"), "ignored").unwrap();

        let cfg = load_config_from_source(&dir).unwrap();
        assert_eq!(cfg.pagination.default_page_size, 10);
        assert_eq!(cfg.pagination.max_page_size, 30);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_override_fragments_merge_in_name_order() {
        let dir = scratch_dir();
        fs::write(
            dir.join("base.toml"),
            "[pagination]\ndefault_page_size = 10\n\n[logging]\nlevel = \"info\"\n",
        )
        .unwrap();
        let overrides = dir.join("overrides");
        fs::create_dir_all(&overrides).unwrap();
        fs::write(overrides.join("20-late.toml"), "[pagination]\ndefault_page_size = 25\n").unwrap();
        fs::write(
            overrides.join("10-early.toml"),
            "[pagination]\ndefault_page_size = 15\nmax_page_size = 40\n",
        )
        .unwrap();

        let cfg = load_config_from_source(&dir).unwrap();
        // 后面的片段覆盖前面的，未覆盖的键保留
        assert_eq!(cfg.pagination.default_page_size, 25);
        assert_eq!(cfg.pagination.max_page_size, 40);
        assert_eq!(cfg.logging.level, "info");

        fs::write(overrides.join("30-broken.toml"), "[pagination\n").unwrap();
        let err = load_config_from_source(&dir).unwrap_err();
        assert!(format!("{err:#}").contains("invalid pagination config"));
        assert!(format!("{err:#}").contains("30-broken.toml"));

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_overlay_value_replaces_scalars_and_merges_tables() {
        let mut target: Value = toml::from_str("[mongodb]\nurl = \"a\"\ndatabase = \"forum\"\n").unwrap();
        let overlay: Value = toml::from_str("[mongodb]\nurl = \"b\"\n").unwrap();
        overlay_value(&mut target, overlay);
        assert_eq!(target["mongodb"]["url"].as_str(), Some("b"));
        assert_eq!(target["mongodb"]["database"].as_str(), Some("forum"));

        // 类型不同时整体替换
        let overlay: Value = toml::from_str("mongodb = \"disabled\"\n").unwrap();
        overlay_value(&mut target, overlay);
        assert_eq!(target["mongodb"].as_str(), Some("disabled"));
    }

    #[test]
    fn test_invalid_values_are_corrected() {
        let dir = scratch_dir();
        let file = dir.join("config.toml");
        fs::write(
            &file,
            "[pagination]\ndefault_page_size = 500\nmax_page_size = 0\n",
        )
        .unwrap();

        let cfg = load_config_from_source(&file).unwrap();
        assert_eq!(cfg.pagination.max_page_size, 100);
        assert_eq!(cfg.pagination.default_page_size, 100);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let missing = std::env::temp_dir().join("kogo-config-does-not-exist.toml");
        assert!(load_config_from_source(&missing).is_err());

        // 回退为默认配置
        let cfg = load_with_fallback(&[missing]);
        assert_eq!(cfg, PaginationAppConfig::default());
    }
}
