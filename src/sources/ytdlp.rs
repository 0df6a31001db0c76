use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ResolveError, RetryPolicy, TrackResolver};
use crate::audio::track::Track;

/// Perfiles de cliente de YouTube, en orden de preferencia
const CLIENT_PROFILES: [&str; 3] = ["android,ios", "web", "mweb"];

/// Resolver que delega en `yt-dlp -J`, rotando perfiles de cliente
pub struct YtDlpResolver {
    binary: PathBuf,
    cookies: Option<PathBuf>,
    policy: RetryPolicy,
}

impl YtDlpResolver {
    pub fn new(binary: PathBuf, cookies: Option<PathBuf>, policy: RetryPolicy) -> Self {
        match &cookies {
            Some(path) => info!("🍪 Usando cookies de: {}", path.display()),
            None => debug!("🍪 Sin archivo de cookies"),
        }
        Self {
            binary,
            cookies,
            policy,
        }
    }

    async fn extract(&self, target: &str, profile: &str) -> Result<YtDlpInfo, ResolveError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "-J",
            "--no-playlist",
            "--no-warnings",
            "-f",
            "bestaudio/best",
            "--extractor-args",
            &format!("youtube:player_client={profile}"),
        ]);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg(target)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| ResolveError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, target));
        }

        parse_info(&output.stdout, target)
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolveError::NotFound(String::new()));
        }

        let target = search_target(query);
        let track = self
            .policy
            .run(|attempt| {
                let profile = CLIENT_PROFILES[attempt as usize % CLIENT_PROFILES.len()];
                debug!("🔍 yt-dlp [{}] -> {}", profile, target);
                self.extract(&target, profile)
            })
            .await?
            .into_track(query)?;

        info!("✅ Resuelto: {}", track.title);
        Ok(track)
    }

    async fn related(&self, seed: &Track) -> Result<Track, ResolveError> {
        let track = self.resolve(&format!("{} mix", seed.title)).await?;
        if track.original_url == seed.original_url {
            warn!("🎲 El relacionado de '{}' es la misma canción", seed.title);
            return Err(ResolveError::NotFound(format!("{} mix", seed.title)));
        }
        Ok(track)
    }
}

/// URLs van tal cual; el texto libre se busca en YouTube
fn search_target(query: &str) -> String {
    match Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
        _ => format!("ytsearch1:{query}"),
    }
}

/// Clasifica la salida de error de yt-dlp
fn classify_failure(stderr: &str, target: &str) -> ResolveError {
    let lower = stderr.to_lowercase();

    if lower.contains("http error 429") || lower.contains("too many requests") {
        ResolveError::RateLimited
    } else if lower.contains("sign in to confirm")
        || lower.contains("not a bot")
        || lower.contains("http error 403")
    {
        ResolveError::Blocked(first_error_line(stderr))
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("unsupported url")
        || lower.contains("no video results")
    {
        ResolveError::NotFound(target.to_string())
    } else {
        ResolveError::Process(first_error_line(stderr))
    }
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().next())
        .unwrap_or("sin salida")
        .trim()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

impl YtDlpInfo {
    /// Las búsquedas devuelven una lista; se usa el primer resultado
    fn into_track(mut self, query: &str) -> Result<Track, ResolveError> {
        if !self.entries.is_empty() {
            self = self.entries.swap_remove(0);
        }

        let stream_url = self
            .url
            .ok_or_else(|| ResolveError::NotFound(query.to_string()))?;
        let title = self.title.unwrap_or_else(|| "Unknown".to_string());

        let mut track = Track::new(title, stream_url)
            .with_original_url(self.webpage_url.unwrap_or_else(|| query.to_string()));
        if let Some(duration) = self.duration.filter(|d| d.is_finite() && *d >= 0.0) {
            track = track.with_duration(std::time::Duration::from_secs_f64(duration));
        }
        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        Ok(track)
    }
}

fn parse_info(stdout: &[u8], target: &str) -> Result<YtDlpInfo, ResolveError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::Process(format!("JSON de yt-dlp inválido: {e}")))?;

    if info.url.is_none() && info.entries.is_empty() {
        return Err(ResolveError::NotFound(target.to_string()));
    }
    Ok(info)
}

/// Verifica que yt-dlp y ffmpeg estén disponibles
pub async fn verify_dependencies(ytdlp: &Path, ffmpeg: &Path) -> Result<()> {
    let ytdlp_check = tokio::process::Command::new(ytdlp)
        .arg("--version")
        .output()
        .await;

    match ytdlp_check {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            info!("✅ yt-dlp versión: {}", version.trim());
        }
        _ => {
            error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
            anyhow::bail!("yt-dlp no disponible");
        }
    }

    let ffmpeg_check = tokio::process::Command::new(ffmpeg)
        .arg("-version")
        .output()
        .await;

    match ffmpeg_check {
        Ok(output) if output.status.success() => info!("✅ ffmpeg disponible"),
        _ => {
            error!("❌ ffmpeg no encontrado. Instala con: sudo apt install ffmpeg");
            anyhow::bail!("ffmpeg no disponible");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_search_target() {
        assert_eq!(search_target("lofi beats"), "ytsearch1:lofi beats");
        assert_eq!(
            search_target("https://www.youtube.com/watch?v=abc"),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(search_target("ftp://host/file"), "ytsearch1:ftp://host/file");
    }

    #[test]
    fn test_search_result_uses_first_entry() {
        let json = br#"{
            "title": "ytsearch1:lofi",
            "entries": [{
                "title": "Lofi Mix",
                "url": "https://rr.example/audio",
                "duration": 185.4,
                "thumbnail": "https://img.example/1.jpg",
                "webpage_url": "https://www.youtube.com/watch?v=abc"
            }]
        }"#;

        let track = parse_info(json, "ytsearch1:lofi")
            .and_then(|info| info.into_track("lofi"))
            .expect("track");
        assert_eq!(track.title, "Lofi Mix");
        assert_eq!(track.stream_url, "https://rr.example/audio");
        assert_eq!(track.duration_secs, Some(185));
        assert_eq!(track.original_url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_empty_search_is_not_found() {
        let json = br#"{"title": "ytsearch1:zzz", "entries": []}"#;
        assert!(matches!(
            parse_info(json, "ytsearch1:zzz"),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: HTTP Error 429: Too Many Requests", "x"),
            ResolveError::RateLimited
        );
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Sign in to confirm you're not a bot", "x"),
            ResolveError::Blocked(_)
        ));
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable", "x"),
            ResolveError::NotFound("x".to_string())
        );
        assert!(matches!(
            classify_failure("something odd happened", "x"),
            ResolveError::Process(_)
        ));
    }
}
