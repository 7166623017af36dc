use serde::Deserialize;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_SESSION_SECRET";

const DEFAULT_SYSTEM_PROMPT: &str = "あなたは「トラブル解決ラボ」の相談員です。\
騒音、近隣関係、賃貸住宅の大家や管理会社とのトラブルなど、日常の揉め事について、\
相談者の状況を丁寧に聞き取り、現実的で角の立たない解決策を段階的に提案してください。\
法律の断定的な判断は避け、必要に応じて専門家や公的な相談窓口の利用を勧めてください。";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Static key accepted in the `X-Admin-Key` header. Header auth is
    /// disabled when unset.
    pub admin_key: Option<String>,
    pub session_secret: String,
    /// Lifetime of issued session tokens.
    /// Set via TROUBLELAB_SESSION_TTL_HOURS. Default: 168 (one week).
    pub session_ttl_hours: i64,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub system_prompt: String,
    /// Allowed CORS origin for the browser front end.
    pub dashboard_origin: String,
}

impl Config {
    /// Returns the admin key if header authentication is enabled.
    /// An empty value counts as disabled.
    pub fn admin_key(&self) -> Option<&str> {
        self.admin_key.as_deref().filter(|k| !k.is_empty())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let session_secret = std::env::var("TROUBLELAB_SESSION_SECRET")
        .unwrap_or_else(|_| PLACEHOLDER_SECRET.into());

    if session_secret == PLACEHOLDER_SECRET {
        let env_mode = std::env::var("TROUBLELAB_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "TROUBLELAB_SESSION_SECRET is still the insecure placeholder. \
                 Set a long random secret before running in production."
            );
        }
        eprintln!("⚠️  TROUBLELAB_SESSION_SECRET is not set, using insecure placeholder.");
    }

    Ok(Config {
        port: std::env::var("TROUBLELAB_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .unwrap_or(3000),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/troublelab".into()),
        admin_key: std::env::var("TROUBLELAB_ADMIN_KEY").ok(),
        session_secret,
        session_ttl_hours: std::env::var("TROUBLELAB_SESSION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|h| *h > 0)
            .unwrap_or(168),
        llm_base_url: std::env::var("TROUBLELAB_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
        llm_api_key: std::env::var("TROUBLELAB_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default(),
        llm_model: std::env::var("TROUBLELAB_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        llm_timeout_secs: std::env::var("TROUBLELAB_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        system_prompt: std::env::var("TROUBLELAB_SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.into()),
        dashboard_origin: std::env::var("TROUBLELAB_DASHBOARD_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
    })
}
