use std::env;

/// Engine-wide configuration, loaded once at startup from the environment.
///
/// Follows the same idiom as the host application's own `AppConfig`: values
/// an operator must supply use `.expect(...)`, values with a sane default
/// use `.unwrap_or_else(...)`. Nothing here is recomputed per request.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub port: u16,

    pub max_machine_instances: u32,
    pub max_user_concurrent: u32,
    pub max_user_cpu_ms: i64,
    pub max_wall_ms: u64,

    pub interpreter_path: String,
    pub interpreter_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Load .env file if it exists.
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),

            max_machine_instances: env::var("MAX_MACHINE_INSTANCES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            max_user_concurrent: env::var("MAX_USER_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            max_user_cpu_ms: env::var("MAX_USER_CPU_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7_200_000),
            max_wall_ms: env::var("MAX_WALL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15_000),

            interpreter_path: env::var("INTERPRETER_PATH").unwrap_or_else(|_| "deno".to_string()),
            interpreter_args: env::var("INTERPRETER_ARGS")
                .ok()
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(default_interpreter_args),
        }
    }
}

/// The closed, least-privilege flag set from §4.2: outbound network allowed,
/// everything else denied. No "default allow" — any future capability must
/// be added here explicitly.
fn default_interpreter_args() -> Vec<String> {
    vec![
        "run".to_string(),
        "--quiet".to_string(),
        "--allow-net".to_string(),
        "--deny-read".to_string(),
        "--deny-write".to_string(),
        "--deny-env".to_string(),
        "--deny-run".to_string(),
        "--deny-ffi".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interpreter_args_deny_everything_but_network() {
        let args = default_interpreter_args();
        assert!(args.contains(&"--allow-net".to_string()));
        assert!(args.contains(&"--deny-read".to_string()));
        assert!(args.contains(&"--deny-write".to_string()));
        assert!(args.contains(&"--deny-env".to_string()));
        assert!(args.contains(&"--deny-run".to_string()));
        assert!(args.contains(&"--deny-ffi".to_string()));
        assert!(!args.iter().any(|a| a == "--allow-all"));
    }
}
