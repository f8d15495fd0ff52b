//! CLI settings resolved from flags and `TESTPILOT_*` environment
//! variables.

use std::path::PathBuf;

use anyhow::{bail, Result};

use testpilot_driver::DriverConfig;
use testpilot_generator::{OpenAiConfig, OpenAiGenerator};

/// Everything a run needs besides the test definition itself.
#[derive(Clone, Debug)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: Option<String>,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
}

impl Settings {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            headless: self.headless,
            chrome_executable: self.chrome_executable.clone(),
            ..DriverConfig::default()
        }
    }

    pub fn generator(&self) -> Result<OpenAiGenerator> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("no API key configured; pass --api-key or set TESTPILOT_API_KEY");
        };
        let mut config = OpenAiConfig::new(api_key, self.model.clone());
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base.clone());
        }
        Ok(OpenAiGenerator::new(config)?)
    }
}

/// Parse one `key=value` pair from the command line.
pub fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_pairs_split_on_first_equals() {
        assert_eq!(
            parse_key_val("password=a=b").unwrap(),
            ("password".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("nokey").is_err());
        assert!(parse_key_val("=value").is_err());
    }
}
