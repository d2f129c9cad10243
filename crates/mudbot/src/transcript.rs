//! 對話記錄
//!
//! 將收到的文字附加寫入檔案

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static::lazy_static! {
    static ref ANSI_ESCAPE: Regex =
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ANSI escape pattern is valid");
}

/// 記錄錯誤
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("transcript I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transcript is not open")]
    NotOpen,
}

/// 記錄格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    /// 純文字（移除 ANSI 顏色碼）
    #[default]
    PlainText,
    /// 原始格式（保留 ANSI 顏色碼）
    Raw,
}

/// 對話記錄器
#[derive(Default)]
pub struct Transcript {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    format: TranscriptFormat,
}

impl Transcript {
    pub fn new(format: TranscriptFormat) -> Self {
        Self {
            path: None,
            writer: None,
            format,
        }
    }

    pub fn format(&self) -> TranscriptFormat {
        self.format
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 開始記錄（附加模式，目錄不存在時建立）
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<(), TranscriptError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "--- session started {} ---",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        self.writer = Some(writer);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TranscriptError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// 記錄一段收到的文字；未開啟時忽略
    pub fn record(&mut self, text: &str) -> Result<(), TranscriptError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        match self.format {
            TranscriptFormat::PlainText => {
                let clean = strip_ansi(text).replace('\r', "");
                writer.write_all(clean.as_bytes())?;
            }
            TranscriptFormat::Raw => writer.write_all(text.as_bytes())?,
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TranscriptError> {
        self.writer
            .as_mut()
            .ok_or(TranscriptError::NotOpen)?
            .flush()?;
        Ok(())
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// 移除 ANSI 轉義碼
pub fn strip_ansi(input: &str) -> String {
    ANSI_ESCAPE.replace_all(input, "").into_owned()
}
