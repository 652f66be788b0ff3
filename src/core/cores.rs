/// Proxy core (Xray / Sing-Box) release lookup and installation
///
/// Releases come from the GitHub API. The binary is unpacked into
/// `<data_dir>/<core>-core/` so the bind-mounted path is identical on the
/// host and inside the container.

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use semver::Version;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::utils::{OpsError, GITHUB_API_URL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreKind {
    Xray,
    SingBox,
}

impl CoreKind {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "xray" => Ok(CoreKind::Xray),
            "sing-box" | "singbox" | "sing_box" => Ok(CoreKind::SingBox),
            other => Err(anyhow!("Unknown core '{}', expected xray or sing-box", other)),
        }
    }

    pub fn repo(&self) -> &'static str {
        match self {
            CoreKind::Xray => "XTLS/Xray-core",
            CoreKind::SingBox => "SagerNet/sing-box",
        }
    }

    /// `.env` key the panel/node reads the executable path from
    pub fn env_key(&self) -> &'static str {
        match self {
            CoreKind::Xray => "XRAY_EXECUTABLE_PATH",
            CoreKind::SingBox => "SING_BOX_EXECUTABLE_PATH",
        }
    }

    pub fn binary_name(&self) -> &'static str {
        match self {
            CoreKind::Xray => "xray",
            CoreKind::SingBox => "sing-box",
        }
    }

    pub fn install_dir_name(&self) -> &'static str {
        match self {
            CoreKind::Xray => "xray-core",
            CoreKind::SingBox => "sing-box-core",
        }
    }

    /// Release asset naming for the CPU architecture (`std::env::consts::ARCH`)
    pub fn arch_label(&self, arch: &str) -> Result<&'static str, OpsError> {
        let label = match (self, arch) {
            (CoreKind::Xray, "x86_64") => Some("64"),
            (CoreKind::Xray, "x86") => Some("32"),
            (CoreKind::Xray, "aarch64") => Some("arm64-v8a"),
            (CoreKind::Xray, "arm") => Some("arm32-v7a"),
            (CoreKind::Xray, "riscv64") => Some("riscv64"),
            (CoreKind::Xray, "s390x") => Some("s390x"),
            (CoreKind::SingBox, "x86_64") => Some("amd64"),
            (CoreKind::SingBox, "x86") => Some("386"),
            (CoreKind::SingBox, "aarch64") => Some("arm64"),
            (CoreKind::SingBox, "arm") => Some("armv7"),
            (CoreKind::SingBox, "riscv64") => Some("riscv64"),
            (CoreKind::SingBox, "s390x") => Some("s390x"),
            _ => None,
        };

        label.ok_or_else(|| OpsError::UnsupportedArch {
            core: self.to_string(),
            arch: arch.to_string(),
        })
    }

    /// Release asset file name for `version` (tag, with or without `v`)
    pub fn asset_name(&self, version: &str, arch: &str) -> Result<String, OpsError> {
        let label = self.arch_label(arch)?;
        Ok(match self {
            CoreKind::Xray => format!("Xray-linux-{}.zip", label),
            CoreKind::SingBox => format!(
                "sing-box-{}-linux-{}.tar.gz",
                version.trim_start_matches('v'),
                label
            ),
        })
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// GitHub release API response
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    pub fn version(&self) -> Option<Version> {
        Version::parse(self.tag_name.trim_start_matches('v')).ok()
    }

    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Newest non-draft, non-prerelease release by semantic version
pub fn latest_stable(releases: &[Release]) -> Option<&Release> {
    releases
        .iter()
        .filter(|r| !r.draft && !r.prerelease)
        .filter_map(|r| r.version().filter(|v| v.pre.is_empty()).map(|v| (v, r)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, r)| r)
}

/// Find a release by tag, tolerating a missing or extra `v`
pub fn find_release<'a>(releases: &'a [Release], version: &str) -> Option<&'a Release> {
    let wanted = version.trim_start_matches('v');
    releases
        .iter()
        .find(|r| r.tag_name.trim_start_matches('v') == wanted)
}

pub struct ReleaseClient {
    client: reqwest::Client,
    api_url: String,
}

impl ReleaseClient {
    pub fn new() -> Result<Self> {
        Self::with_api_url(GITHUB_API_URL)
    }

    pub fn with_api_url(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("panelctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Recent releases of `repo` (`owner/name`)
    pub async fn list_releases(&self, repo: &str) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{}/releases?per_page=30", self.api_url, repo);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to fetch releases of {}", repo))?;

        if !response.status().is_success() {
            anyhow::bail!("GitHub API returned HTTP {} for {}", response.status(), repo);
        }

        response
            .json()
            .await
            .context("Failed to parse GitHub release response")
    }

    /// Download `url` to `dest`, showing a progress bar
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download {}: HTTP {}", url, response.status());
        }

        let bar = match response.content_length() {
            Some(len) => ProgressBar::new(len).with_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            ),
            None => ProgressBar::new_spinner(),
        };

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Download interrupted")?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }
        file.flush().await?;
        bar.finish_and_clear();

        Ok(written)
    }
}

#[derive(Debug, Clone)]
pub struct InstalledCore {
    pub kind: CoreKind,
    pub version: String,
    pub binary: PathBuf,
}

pub struct CoreInstaller<'a> {
    client: &'a ReleaseClient,
    data_dir: &'a Path,
    arch: &'a str,
}

impl<'a> CoreInstaller<'a> {
    pub fn new(client: &'a ReleaseClient, data_dir: &'a Path) -> Self {
        Self {
            client,
            data_dir,
            arch: std::env::consts::ARCH,
        }
    }

    pub fn with_arch(mut self, arch: &'a str) -> Self {
        self.arch = arch;
        self
    }

    pub fn install_dir(&self, kind: CoreKind) -> PathBuf {
        self.data_dir.join(kind.install_dir_name())
    }

    /// Download and unpack `version` (latest stable when `None`)
    pub async fn install(&self, kind: CoreKind, version: Option<&str>) -> Result<InstalledCore> {
        let releases = self.client.list_releases(kind.repo()).await?;
        let release = match version {
            Some(v) => find_release(&releases, v)
                .ok_or_else(|| anyhow!("{} release {} not found", kind, v))?,
            None => latest_stable(&releases)
                .ok_or_else(|| anyhow!("No stable {} release found", kind))?,
        };

        let asset_name = kind.asset_name(&release.tag_name, self.arch)?;
        let asset = release
            .asset(&asset_name)
            .ok_or_else(|| anyhow!("Release {} has no asset {}", release.tag_name, asset_name))?;

        let install_dir = self.install_dir(kind);
        fs::create_dir_all(&install_dir)
            .with_context(|| format!("Failed to create {}", install_dir.display()))?;

        let download_path = install_dir.join(&asset_name);
        tracing::info!(%kind, version = %release.tag_name, asset = %asset_name, "downloading core");
        self.client
            .download(&asset.browser_download_url, &download_path)
            .await?;

        let result = match kind {
            CoreKind::Xray => extract_zip_core(&download_path, &install_dir, kind.binary_name()),
            CoreKind::SingBox => extract_tar_core(&download_path, &install_dir, kind.binary_name()).await,
        };
        let _ = fs::remove_file(&download_path);
        let binary = result?;

        set_executable(&binary)?;

        Ok(InstalledCore {
            kind,
            version: release.tag_name.clone(),
            binary,
        })
    }
}

/// Xray ships a flat zip: the binary plus geo data files
fn extract_zip_core(archive: &Path, dest: &Path, binary_name: &str) -> Result<PathBuf> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).context("Core archive is not a zip")?;

    let mut binary = None;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        // Flat layout only; directories inside the zip are ignored
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_owned()))
        else {
            continue;
        };

        // The old binary may be executing (ETXTBSY on write); replace by rename
        let out_path = dest.join(&name);
        let tmp_path = dest.join(format!(".{}.new", name.to_string_lossy()));
        {
            let mut out = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            std::io::copy(&mut entry, &mut out)?;
        }
        fs::rename(&tmp_path, &out_path)
            .with_context(|| format!("Failed to replace {}", out_path.display()))?;

        if name == binary_name {
            binary = Some(out_path);
        }
    }

    binary.ok_or_else(|| anyhow!("{} not found in {}", binary_name, archive.display()))
}

/// Sing-Box ships `sing-box-<ver>-linux-<arch>/sing-box` in a tar.gz
async fn extract_tar_core(archive: &Path, dest: &Path, binary_name: &str) -> Result<PathBuf> {
    let unpack_dir = dest.join(".unpack");
    fs::create_dir_all(&unpack_dir)?;

    let output = tokio::process::Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(&unpack_dir)
        .output()
        .await
        .context("Failed to run tar")?;

    let result = if output.status.success() {
        find_file(&unpack_dir, binary_name)
            .ok_or_else(|| anyhow!("{} not found in {}", binary_name, archive.display()))
            .and_then(|found| {
                let target = dest.join(binary_name);
                fs::rename(&found, &target)
                    .with_context(|| format!("Failed to move {}", found.display()))?;
                Ok(target)
            })
    } else {
        Err(OpsError::CommandFailed {
            command: format!("tar -xzf {}", archive.display()),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    };

    let _ = fs::remove_dir_all(&unpack_dir);
    result
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, name) {
                return Some(found);
            }
        } else if entry.file_name() == name {
            return Some(path);
        }
    }
    None
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
