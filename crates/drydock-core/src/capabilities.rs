use serde_json::Value;

/// Session configuration extracted from a desired-capabilities blob. The
/// raw blob is retained untouched for drivers that want to inspect vendor
/// keys.
#[derive(Debug, Clone, Default)]
pub struct DesiredCapabilities {
    pub platform: Option<String>,
    pub name: Option<String>,
    pub take_screenshot: bool,
    pub run_script: Option<String>,
    pub raw: Value,
}

impl DesiredCapabilities {
    pub fn from_value(dc: &Value) -> Self {
        let platform = dc
            .get("platform")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let name = dc
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_owned);
        let take_screenshot = dc
            .get("takeScreenshot")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false);
        let run_script = dc.get("runScript").map(|v| v.to_string());

        Self {
            platform,
            name,
            take_screenshot,
            run_script,
            raw: dc.clone(),
        }
    }
}
