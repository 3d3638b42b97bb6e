//! Locating the tesseract executable and its language data.
//!
//! Missing traineddata files are downloaded from the public tessdata
//! repository into the local data directory.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::OcrSettings;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

const TESSERACT_EXE: &str = if cfg!(windows) {
    "tesseract.exe"
} else {
    "tesseract"
};

const COMMON_EXECUTABLES: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    pub tessdata: PathBuf,
}

/// Returns the per-user directory for downloaded Tesseract files
pub fn get_user_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gacha-export")
        .join("tesseract")
}

/// Splits a tesseract language string ("chi_sim+eng") into its parts.
pub fn language_list(languages: &str) -> Vec<&str> {
    languages
        .split('+')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Ensures Tesseract and the configured languages are available.
///
/// The executable must be installed by the user; language data is
/// downloaded when no known directory has all of it.
pub fn ensure_tesseract(settings: &OcrSettings) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(settings.tesseract_path.as_deref())?;
    let languages = language_list(&settings.languages);
    if languages.is_empty() {
        return Err(anyhow!("No OCR languages configured"));
    }

    if let Some(tessdata) = find_tessdata_dir(&tessdata_candidates(), &languages) {
        info!("Tesseract ready: {} (data {})", executable.display(), tessdata.display());
        return Ok(TesseractPaths {
            executable,
            tessdata,
        });
    }

    let tessdata = get_user_tesseract_dir().join("tessdata");
    fs::create_dir_all(&tessdata)
        .with_context(|| format!("Failed to create {}", tessdata.display()))?;

    for lang in languages {
        let file_name = format!("{}.traineddata", lang);
        let target = tessdata.join(&file_name);
        if target.exists() {
            continue;
        }
        match find_system_traineddata(&file_name) {
            Some(source) => {
                info!("Copying {} from: {}", file_name, source.display());
                fs::copy(&source, &target)?;
            }
            None => download_traineddata(lang, &target)?,
        }
    }

    info!("Tesseract ready: {} (data {})", executable.display(), tessdata.display());
    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Finds the Tesseract executable: configured path, local dirs, PATH, then
/// common install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "Configured tesseract_path {} does not exist",
            path.display()
        ));
    }

    for dir in [crate::paths::get_tesseract_dir(), get_user_tesseract_dir()] {
        let local_exe = dir.join(TESSERACT_EXE);
        if local_exe.exists() {
            return Ok(local_exe);
        }
    }

    // Check PATH
    if let Ok(output) = std::process::Command::new("tesseract")
        .arg("--version")
        .output()
    {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for path in COMMON_EXECUTABLES {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Please install Tesseract-OCR:\n\
         1. Download from: https://github.com/UB-Mannheim/tesseract/releases (Windows)\n\
         2. Install to the default location or add it to PATH\n\
         3. Or set \"ocr.tesseract_path\" in config.json"
    ))
}

/// Directories searched for traineddata, most specific first.
fn tessdata_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        crate::paths::get_tesseract_dir().join("tessdata"),
        get_user_tesseract_dir().join("tessdata"),
    ];
    candidates.extend(SYSTEM_TESSDATA_DIRS.iter().map(PathBuf::from));
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }
    candidates
}

/// Returns the first candidate directory that has every language.
pub fn find_tessdata_dir(candidates: &[PathBuf], languages: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|dir| {
            languages
                .iter()
                .all(|lang| dir.join(format!("{}.traineddata", lang)).exists())
        })
        .cloned()
}

fn find_system_traineddata(file_name: &str) -> Option<PathBuf> {
    SYSTEM_TESSDATA_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(file_name))
        .find(|p| p.exists())
}

/// Downloads `<lang>.traineddata` from GitHub.
fn download_traineddata(lang: &str, target: &Path) -> Result<()> {
    let url = format!("{}/{}.traineddata", TESSDATA_REPO, lang);
    info!("Downloading {}.traineddata...", lang);
    debug!("GET {}", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "gacha-export")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            lang,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    // Write under a temporary name so an interrupted download is not picked up
    let partial = target.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&partial, target)?;

    info!("Downloaded {}.traineddata ({} bytes)", lang, bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_language_list() {
        assert_eq!(language_list("chi_sim+eng"), vec!["chi_sim", "eng"]);
        assert_eq!(language_list(" eng + "), vec!["eng"]);
        assert!(language_list("").is_empty());
    }

    #[test]
    fn test_find_tessdata_dir_needs_every_language() {
        let partial = tempdir().unwrap();
        let complete = tempdir().unwrap();
        fs::write(partial.path().join("eng.traineddata"), b"x").unwrap();
        fs::write(complete.path().join("eng.traineddata"), b"x").unwrap();
        fs::write(complete.path().join("chi_sim.traineddata"), b"x").unwrap();

        let candidates = vec![partial.path().to_path_buf(), complete.path().to_path_buf()];
        let found = find_tessdata_dir(&candidates, &["chi_sim", "eng"]);
        assert_eq!(found.as_deref(), Some(complete.path()));

        assert_eq!(
            find_tessdata_dir(&candidates, &["eng"]).as_deref(),
            Some(partial.path())
        );
        assert!(find_tessdata_dir(&candidates, &["jpn"]).is_none());
    }

    #[test]
    fn test_configured_executable_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope").join(TESSERACT_EXE);
        assert!(find_tesseract_executable(Some(&missing)).is_err());

        let present = dir.path().join(TESSERACT_EXE);
        fs::write(&present, b"").unwrap();
        assert_eq!(find_tesseract_executable(Some(&present)).unwrap(), present);
    }
}
