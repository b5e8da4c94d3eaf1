//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 覆盖顺序：配置文件 -> `config/environments/{env}.toml` -> 环境变量

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;
use tracing::warn;

use super::{MongoInstanceConfig, PaginationAppConfig};

pub const ENV_NAME: &str = "KOGO_ENV";
pub const ENV_DEFAULT_PAGE_SIZE: &str = "KOGO_PAGINATION_DEFAULT_PAGE_SIZE";
pub const ENV_MAX_PAGE_SIZE: &str = "KOGO_PAGINATION_MAX_PAGE_SIZE";
pub const ENV_MONGO_URL: &str = "KOGO_MONGO_URL";
pub const ENV_MONGO_DATABASE: &str = "KOGO_MONGO_DATABASE";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称，未设置时为 "development"
    pub fn get_environment() -> String {
        env::var(ENV_NAME).unwrap_or_else(|_| "development".to_string())
    }

    /// 加载 `config/environments/{environment}.toml` 并覆盖到基础配置
    pub fn load_environment_config(base_config: &mut PaginationAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if Path::new(&env_config_path).exists() {
            let env_config_content = fs::read_to_string(&env_config_path)
                .with_context(|| format!("无法读取环境配置文件: {}", env_config_path))?;
            let env_config: Value = toml::from_str(&env_config_content)
                .with_context(|| format!("无效的环境配置格式: {}", env_config_path))?;

            Self::merge_config_values(base_config, &env_config);
        }

        Ok(())
    }

    /// 使用进程环境变量覆盖配置
    pub fn apply_env_overrides(config: &mut PaginationAppConfig) {
        Self::apply_overrides_from(config, |key| env::var(key).ok());
    }

    /// 使用给定的查找函数覆盖配置
    pub fn apply_overrides_from<F>(config: &mut PaginationAppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(size) = parse_size(ENV_DEFAULT_PAGE_SIZE, lookup(ENV_DEFAULT_PAGE_SIZE)) {
            config.pagination.default_page_size = size;
        }
        if let Some(size) = parse_size(ENV_MAX_PAGE_SIZE, lookup(ENV_MAX_PAGE_SIZE)) {
            config.pagination.max_page_size = size;
        }
        if let Some(url) = lookup(ENV_MONGO_URL).filter(|url| !url.is_empty()) {
            config
                .mongodb
                .get_or_insert_with(MongoInstanceConfig::default)
                .url = url;
        }
        if let Some(database) = lookup(ENV_MONGO_DATABASE).filter(|db| !db.is_empty()) {
            config
                .mongodb
                .get_or_insert_with(MongoInstanceConfig::default)
                .database = Some(database);
        }
    }

    /// 合并环境配置中的已知字段
    fn merge_config_values(config: &mut PaginationAppConfig, env_config: &Value) {
        if let Some(pagination) = env_config.get("pagination") {
            let size = |key: &str| {
                pagination
                    .get(key)
                    .and_then(Value::as_integer)
                    .and_then(|v| usize::try_from(v).ok())
            };
            if let Some(v) = size("default_page_size") {
                config.pagination.default_page_size = v;
            }
            if let Some(v) = size("max_page_size") {
                config.pagination.max_page_size = v;
            }
            if let Some(v) = size("search_max_results") {
                config.pagination.search_max_results = v;
            }
        }

        if let Some(mongodb) = env_config.get("mongodb") {
            let target = config
                .mongodb
                .get_or_insert_with(MongoInstanceConfig::default);
            if let Some(url) = mongodb.get("url").and_then(Value::as_str) {
                target.url = url.to_string();
            }
            if let Some(database) = mongodb.get("database").and_then(Value::as_str) {
                target.database = Some(database.to_string());
            }
        }

        if let Some(level) = env_config
            .get("logging")
            .and_then(|logging| logging.get("level"))
            .and_then(Value::as_str)
        {
            config.logging.level = level.to_string();
        }
    }
}

fn parse_size(key: &str, raw: Option<String>) -> Option<usize> {
    let raw = raw?;
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => Some(size),
        _ => {
            warn!("ignoring invalid {key} value: {raw}");
            None
        }
    }
}
