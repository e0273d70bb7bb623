//! 统一路径与目录约定。
//!
//! 目标：
//! - 将落盘路径集中管理（配置文件、本地会话存储）
//! - 数据目录优先取环境变量 `BIDHUB_HOME`，否则为 `$HOME/.bidhub-console`
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::path::PathBuf;

use anyhow::{anyhow, Result};

/// 数据目录环境变量名。
pub const HOME_ENV: &str = "BIDHUB_HOME";

/// `$HOME` 下的默认目录名。
pub const DEFAULT_DIR: &str = ".bidhub-console";

/// 获取数据根目录。
///
/// 异常处理：
/// - `BIDHUB_HOME` 与 `HOME`（Windows 下为 `USERPROFILE`）均不存在时返回错误
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| anyhow!("无法确定数据目录：请设置 {HOME_ENV}"))?;
    Ok(PathBuf::from(home).join(DEFAULT_DIR))
}

/// 默认配置文件：`<data_dir>/console-config.json`。
pub fn default_config_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("console-config.json"))
}

/// 默认会话存储文件：`<data_dir>/local-storage.json`。
pub fn default_store_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("local-storage.json"))
}
