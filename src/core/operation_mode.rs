use std::sync::OnceLock;

/// Dev vs. prod. Dev mode runs the file watcher and serves the build-error
/// page; prod mode handles SIGHUP via an mtime sweep and never substitutes
/// its own error page for a failed build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationMode {
    Dev,
    Prod,
}

impl OperationMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "dev" => Some(OperationMode::Dev),
            "prod" | "production" => Some(OperationMode::Prod),
            _ => None,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, OperationMode::Dev)
    }
}

static OPERATION_MODE: OnceLock<OperationMode> = OnceLock::new();

/// Resolution order: `--mode` flag, then `TQSERVER_MODE` env, then the dev
/// default.
pub fn load_operation_mode(cli_value: Option<String>) -> OperationMode {
    let mode = cli_value
        .as_deref()
        .and_then(OperationMode::parse)
        .or_else(|| std::env::var("TQSERVER_MODE").ok().and_then(|v| OperationMode::parse(&v)))
        .unwrap_or(OperationMode::Dev);

    *OPERATION_MODE.get_or_init(|| mode)
}

pub fn get_operation_mode() -> OperationMode {
    *OPERATION_MODE.get_or_init(|| OperationMode::Dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes_case_insensitively() {
        assert_eq!(OperationMode::parse("dev"), Some(OperationMode::Dev));
        assert_eq!(OperationMode::parse("PROD"), Some(OperationMode::Prod));
        assert_eq!(OperationMode::parse("Production"), Some(OperationMode::Prod));
        assert_eq!(OperationMode::parse("bogus"), None);
    }
}
