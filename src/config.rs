//! 환경 변수 기반 설정

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub room: RoomConfig,
    pub negotiation: NegotiationConfig,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// 방 최대 인원 (호스트 포함). 0이면 제한 없음
    pub max_size: usize,
    /// 충돌 시 방 id 재시도 횟수
    pub id_attempts: usize,
}

/// 클라이언트 측 협상 설정
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            room: RoomConfig::default(),
            negotiation: NegotiationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            id_attempts: 8,
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            sweep_interval: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드 (`.env` 있으면 포함)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            port: parse_var("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_origins),
            room: RoomConfig {
                max_size: parse_var("MAX_ROOM_SIZE", defaults.room.max_size),
                id_attempts: parse_var("ROOM_ID_ATTEMPTS", defaults.room.id_attempts).max(1),
            },
            negotiation: NegotiationConfig {
                timeout: Duration::from_millis(parse_var(
                    "NEGOTIATION_TIMEOUT_MS",
                    defaults.negotiation.timeout.as_millis() as u64,
                )),
                sweep_interval: Duration::from_millis(
                    parse_var(
                        "NEGOTIATION_SWEEP_MS",
                        defaults.negotiation.sweep_interval.as_millis() as u64,
                    )
                    .max(1),
                ),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// 모든 origin 허용 여부
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
