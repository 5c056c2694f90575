use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{admission::AdmissionMode, errors::Error, Result};

/// Which deployment the process runs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Public-facing bot account, media fetched through a backing user session.
    Bridge,
    /// A single user account that both receives commands and fetches media.
    Userbot,
}

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub shape: Shape,

    // MTProto user session
    pub api_id: i32,
    pub session_path: PathBuf,

    // Bot account (bridge only)
    pub bot_token: Option<String>,

    // Access
    pub allowed_users: Vec<i64>,
    pub public_mode: bool,

    // Downloads
    pub download_dir: PathBuf,
    pub max_concurrent: usize,
    pub admission_mode: AdmissionMode,
    pub progress_step: u8,
    /// Per-stage bound on fetch/download/upload. `None` waits forever.
    pub transfer_timeout: Option<Duration>,

    // Outbound status throttling
    pub status_edit_interval: Duration,
}

impl Config {
    pub fn load(shape: Shape) -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // The session file is already authorized; only the app id is sent on connect.
        let api_id = parse_api_id(env_str("API_ID"))?;

        let session_path = PathBuf::from(
            env_str("SESSION")
                .and_then(non_empty)
                .unwrap_or("userbot.session".to_string()),
        );

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty);
        if shape == Shape::Bridge && bot_token.is_none() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let allowed_users = parse_csv_i64(env_str("ALLOWED_USERS"));
        let public_mode = env_bool("PUBLIC_MODE").unwrap_or(false);

        let download_dir = PathBuf::from(
            env_str("DOWNLOAD_FOLDER")
                .and_then(non_empty)
                .unwrap_or("downloads".to_string()),
        );
        fs::create_dir_all(&download_dir)?;

        let max_concurrent = env_usize("MAX_CONCURRENT").unwrap_or(2).max(1);
        let admission_mode = match env_str("ADMISSION_MODE") {
            Some(raw) => AdmissionMode::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "ADMISSION_MODE must be `queue` or `fail_fast`, got `{}`",
                    raw.trim()
                ))
            })?,
            None => AdmissionMode::Queue,
        };
        let progress_step = env_u64("PROGRESS_STEP_PERCENT").unwrap_or(10).clamp(1, 100) as u8;
        let transfer_timeout = match env_u64("TRANSFER_TIMEOUT_SECS").unwrap_or(1800) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let status_edit_interval =
            Duration::from_millis(env_u64("STATUS_EDIT_INTERVAL_MS").unwrap_or(1050));

        Ok(Self {
            shape,
            api_id,
            session_path,
            bot_token,
            allowed_users,
            public_mode,
            download_dir,
            max_concurrent,
            admission_mode,
            progress_step,
            transfer_timeout,
            status_edit_interval,
        })
    }
}

fn parse_api_id(raw: Option<String>) -> Result<i32> {
    raw.and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
