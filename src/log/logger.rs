use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use dirs::home_dir;
use tokio::{io::AsyncWriteExt, sync::Mutex};

/// Append-only, timestamped log of what happened to one watched branch.
#[derive(Debug, Clone)]
pub struct Logger {
    file: Arc<Mutex<tokio::fs::File>>,
    path: PathBuf,
    color_enable: bool,
}

const RESET: &str = "\x1b[0m";
const BG_BLUE: &str = "\x1b[44m";
const BG_ORANGE: &str = "\x1b[48;5;208m";
const BG_RED: &str = "\x1b[41m";
const BG_GREEN: &str = "\x1b[42m"; // delivered
const BG_MAGENTA: &str = "\x1b[45m"; // released
const FG_BOLD_WHITE: &str = "\x1b[97;1m";

impl Logger {
    pub async fn new(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        let no_color = std::env::var("REVWATCH_NO_COLOR").ok().as_deref() == Some("1");
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            color_enable: !no_color,
        })
    }

    /// `<home>/.revwatch/logs/<name>.log`
    pub fn path_for(name: &str) -> anyhow::Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow::anyhow!("Failed to find HOME directory"))?;
        Ok(home.join(".revwatch").join("logs").join(format!("{name}.log")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn paint_level(&self, level: &str) -> String {
        if !self.color_enable {
            return level.to_string();
        }
        let bg = match level {
            "INFO" => BG_BLUE,
            "WARNING" => BG_ORANGE,
            "ERROR" => BG_RED,
            "DELIVERED" => BG_GREEN,
            "RELEASED" => BG_MAGENTA,
            _ => return level.to_string(),
        };
        format!("{bg}{FG_BOLD_WHITE} {level} {RESET}")
    }

    pub async fn log(&self, level: &str, msg: &str) -> anyhow::Result<()> {
        let mut f = self.file.lock().await;
        let line = format!(
            "[{}] {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.paint_level(level),
            msg
        );
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    pub async fn info(&self, msg: &str) -> anyhow::Result<()> {
        self.log("INFO", msg).await
    }

    pub async fn warning(&self, msg: &str) -> anyhow::Result<()> {
        self.log("WARNING", msg).await
    }

    pub async fn error(&self, msg: &str) -> anyhow::Result<()> {
        self.log("ERROR", msg).await
    }

    pub async fn delivered(&self, msg: &str) -> anyhow::Result<()> {
        self.log("DELIVERED", msg).await
    }

    pub async fn released(&self, msg: &str) -> anyhow::Result<()> {
        self.log("RELEASED", msg).await
    }
}
