//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__POOL_CAPACITY=8`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub reviser: ReviserSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [engine] 段：并发上限、推理循环上限、默认超时与尝试次数
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 同时运行的步骤上限
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// 单步推理循环最大迭代次数
    #[serde(default = "default_max_iterations_per_step")]
    pub max_iterations_per_step: usize,
    /// 步骤未指定 timeout 时的默认超时（秒）
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    /// 步骤未指定 max_attempts 时的默认尝试次数
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// 追踪详细程度：false 时负载截断为预览（记录本身无法关闭）
    #[serde(default)]
    pub enable_tracing: bool,
    /// 单个请求内插入新步骤（恢复步骤 / 副本）的修订次数上限；retry 与 substitute 不计入
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
}

fn default_pool_capacity() -> usize {
    5
}

fn default_max_iterations_per_step() -> usize {
    5
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_revisions() -> usize {
    8
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            max_iterations_per_step: default_max_iterations_per_step(),
            default_step_timeout_secs: default_step_timeout_secs(),
            default_max_attempts: default_max_attempts(),
            enable_tracing: false,
            max_revisions: default_max_revisions(),
        }
    }
}

/// [reviser] 段：默认修订策略的参数
#[derive(Debug, Clone, Deserialize)]
pub struct ReviserSection {
    /// 失败工具 / 步骤类别 -> 替代类别（如 slide_formatter -> report_summary）
    #[serde(default)]
    pub alternatives: BTreeMap<String, String>,
    /// 超时替换时 timeout 的放大倍数
    #[serde(default = "default_timeout_growth")]
    pub timeout_growth: u32,
    /// 插入的恢复步骤类别
    #[serde(default = "default_recovery_kind")]
    pub recovery_kind: String,
    /// 尝试耗尽时，非必需步骤直接跳过而不级联
    #[serde(default)]
    pub skip_non_required: bool,
}

fn default_timeout_growth() -> u32 {
    2
}

fn default_recovery_kind() -> String {
    "recovery".to_string()
}

impl Default for ReviserSection {
    fn default() -> Self {
        Self {
            alternatives: BTreeMap::new(),
            timeout_growth: default_timeout_growth(),
            recovery_kind: default_recovery_kind(),
            skip_non_required: false,
        }
    }
}

/// [tools] 段：单次调用超时与远程网关
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub http: HttpSection,
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            http: HttpSection::default(),
        }
    }
}

/// [tools.http] 段：远程工具服务（POST {base_url}/tools/{tool}），未设置 base_url 时使用本地注册表
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    pub base_url: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.pool_capacity, 5);
        assert_eq!(cfg.engine.max_iterations_per_step, 5);
        assert_eq!(cfg.engine.default_max_attempts, 3);
        assert!(!cfg.engine.enable_tracing);
        assert_eq!(cfg.reviser.timeout_growth, 2);
        assert!(cfg.tools.http.base_url.is_none());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            r#"
[engine]
pool_capacity = 2
enable_tracing = true

[reviser]
skip_non_required = true

[reviser.alternatives]
slide_formatter = "report_summary"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.pool_capacity, 2);
        assert!(cfg.engine.enable_tracing);
        assert_eq!(cfg.engine.max_iterations_per_step, 5);
        assert!(cfg.reviser.skip_non_required);
        assert_eq!(
            cfg.reviser.alternatives.get("slide_formatter").map(String::as_str),
            Some("report_summary")
        );
    }
}
