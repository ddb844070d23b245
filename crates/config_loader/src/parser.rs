//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, PlatformBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<PlatformBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<PlatformBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<PlatformBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::PacingMode;

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[sync]
tolerance_ms = 20.0
pacing = "external"

[recording]
grace_period_s = 3.0
allow_concurrent_per_instance = false
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.sync.pacing, PacingMode::External);
        assert!(!bp.recording.allow_concurrent_per_instance);
        assert!(bp.robots.is_empty());
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "sync": { "tolerance_ms": 20.0 },
            "recording": { "grace_period_s": 3.0, "frequency_hz": 30.0 },
            "broker": { "handshake_timeout_ms": 5000 },
            "robots": [{
                "robot_id": "arm-1",
                "tracks": [{ "kind": "JOINTS", "label": "arm", "frequency_hz": 100.0 }]
            }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.broker.handshake_timeout_ms, 5000);
        assert_eq!(bp.recording.frequency_hz, Some(30.0));
    }

    #[test]
    fn test_tolerance_is_required() {
        let content = r#"
[sync]
output_frequency_hz = 10.0

[recording]
grace_period_s = 3.0
"#;
        let err = parse_toml(content).unwrap_err();
        assert!(err.to_string().contains("tolerance_ms"), "got: {err}");
    }

    #[test]
    fn test_grace_period_is_required() {
        let content = r#"
[sync]
tolerance_ms = 20.0

[recording]
max_duration_s = 60.0
"#;
        let err = parse_toml(content).unwrap_err();
        assert!(err.to_string().contains("grace_period_s"), "got: {err}");
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
