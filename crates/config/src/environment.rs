use std::fmt;

/// Deployment environment, selected by `TESTRIG_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("TESTRIG_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("test") => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        };
        f.write_str(s)
    }
}
