use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::{env, fs};

/// Base URL of the figshare file store hosting the MITOS_WSI_CCMCT slides.
pub const FIGSHARE_BASE_URL: &str = "https://ndownloader.figshare.com/files";

/// (destination, figshare file id) for every slide of the public dataset.
const FIGSHARE_FILES: [(&str, u64); 21] = [
    ("WSI/deb768e5efb9d1dcbc13.svs", 22407414),
    ("WSI/d37ab62158945f22deed.svs", 22585835),
    ("WSI/022857018aa597374b6c.svs", 22407537),
    ("WSI/69a02453620ade0edefd.svs", 22407411),
    ("WSI/a8773be388e12df89edd.svs", 22407540),
    ("WSI/c4b95da36e32993289cb.svs", 22407552),
    ("WSI/3d3d04eca056556b0b26.svs", 22407585),
    ("WSI/d0423ef9a648bb66a763.svs", 22407624),
    ("WSI/50cf88e9a33df0c0c8f9.svs", 22407531),
    ("WSI/084383c18b9060880e82.svs", 22407486),
    ("WSI/4eee7b944ad5e46c60ce.svs", 22407528),
    ("WSI/2191a7aa287ce1d5dbc0.svs", 22407525),
    ("WSI/13528f1921d4f1f15511.svs", 22407519),
    ("WSI/2d56d1902ca533a5b509.svs", 22407522),
    ("WSI/460906c0b1fe17ea5354.svs", 22407447),
    ("WSI/da18e7b9846e9d38034c.svs", 22407453),
    ("WSI/72c93e042d0171a61012.svs", 22407456),
    ("WSI/b1bdee8e5e3372174619.svs", 22407423),
    ("WSI/fa4959e484beec77543b.svs", 22407459),
    ("WSI/e09512d530d933e436d5.svs", 22407465),
    ("WSI/d7a8af121d7d4f3fbf01.svs", 22407477),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Destination, relative to the download directory.
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub files: Vec<ManifestEntry>,
}

impl DatasetManifest {
    /// The 21 whole-slide images of the public canine cutaneous mast cell
    /// tumor dataset (about 37 GB).
    pub fn figshare() -> Self {
        Self {
            files: FIGSHARE_FILES
                .iter()
                .map(|(path, id)| ManifestEntry {
                    path: path.to_string(),
                    url: format!("{}/{}", FIGSHARE_BASE_URL, id),
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(anyhow!("Manifest lists no files"));
        }

        for entry in &self.files {
            url::Url::parse(&entry.url)
                .map_err(|e| anyhow!("Invalid url `{}` for `{}`: {}", entry.url, entry.path, e))?;

            let path = Path::new(&entry.path);
            let escapes = path.components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            });
            if entry.path.is_empty() || escapes {
                return Err(anyhow!(
                    "Manifest path `{}` must be relative and stay inside the download directory",
                    entry.path
                ));
            }
        }

        Ok(())
    }
}

/// Locate a user-supplied manifest: `WSI_MANIFEST`, then
/// `$XDG_CONFIG_HOME/wsi-sampler/manifest.json`, then `./manifest.json`.
pub fn resolve_manifest_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("WSI_MANIFEST") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("wsi-sampler").join("manifest.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("manifest.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Substitute `${NAME}` with the value of `NAME`. Unset variables and a `${`
/// with no closing brace are kept exactly as written.
pub(crate) fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let placeholder = &rest[start..];
        let Some(close) = placeholder.find('}') else {
            out.push_str(placeholder);
            return out;
        };

        let name = &placeholder[2..close];
        match env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&placeholder[..=close]),
        }
        rest = &placeholder[close + 1..];
    }

    out.push_str(rest);
    out
}

pub fn parse_manifest(raw: &str) -> Result<DatasetManifest> {
    let mut manifest: DatasetManifest = serde_json::from_str(raw)?;

    for entry in manifest.files.iter_mut() {
        entry.path = expand_env_vars(&entry.path);
        entry.url = expand_env_vars(&entry.url);
    }

    manifest.validate()?;
    Ok(manifest)
}

pub fn load_manifest(path: &Path) -> Result<DatasetManifest> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read manifest {}: {}", path.display(), e))?;
    parse_manifest(&raw)
}

/// Explicit path, else a resolved user manifest, else the built-in figshare
/// list.
pub fn load_manifest_or_default(path: Option<&Path>) -> Result<DatasetManifest> {
    match path.map(Path::to_path_buf).or_else(resolve_manifest_path) {
        Some(p) => load_manifest(&p),
        None => Ok(DatasetManifest::figshare()),
    }
}

/// Patch sampling parameters shared by the CLI, the dataset loader and the
/// HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Edge length of the square patches.
    pub size: u32,
    pub level: usize,
    pub positive_class: i64,
    pub negative_class: i64,
    /// Radius, in level-0 pixels, of the box drawn around a spot.
    pub spot_radius: f64,
    /// Share of patches centred on an annotated box.
    pub positive_fraction: f64,
    pub seed: Option<u64>,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            size: env_or("WSI_PATCH_SIZE", 256),
            level: 0,
            positive_class: env_or("WSI_POSITIVE_CLASS", 2),
            negative_class: env_or("WSI_NEGATIVE_CLASS", 7),
            spot_radius: 25.0,
            positive_fraction: 0.0,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(anyhow!("Patch size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.positive_fraction) {
            return Err(anyhow!(
                "positive_fraction must be within [0, 1], got {}",
                self.positive_fraction
            ));
        }
        if self.spot_radius <= 0.0 {
            return Err(anyhow!("Spot radius must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figshare_manifest() {
        let manifest = DatasetManifest::figshare();
        assert_eq!(manifest.files.len(), 21);
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.files[0].path, "WSI/deb768e5efb9d1dcbc13.svs");
        assert_eq!(
            manifest.files[0].url,
            "https://ndownloader.figshare.com/files/22407414"
        );
    }

    #[test]
    fn test_parse_manifest() {
        let raw = r#"{"files": [{"path": "WSI/a.svs", "url": "https://example.org/a"}]}"#;
        let manifest = parse_manifest(raw).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].path, "WSI/a.svs");
    }

    #[test]
    fn test_parse_manifest_rejects_bad_entries() {
        let empty = r#"{"files": []}"#;
        assert!(parse_manifest(empty).is_err());

        let bad_url = r#"{"files": [{"path": "a.svs", "url": "not a url"}]}"#;
        assert!(parse_manifest(bad_url).is_err());

        let escaping = r#"{"files": [{"path": "../a.svs", "url": "https://example.org/a"}]}"#;
        assert!(parse_manifest(escaping).is_err());

        let absolute = r#"{"files": [{"path": "/tmp/a.svs", "url": "https://example.org/a"}]}"#;
        assert!(parse_manifest(absolute).is_err());
    }

    #[test]
    fn test_unknown_env_var_is_left_literal() {
        let input = "https://${WSI_SAMPLER_SURELY_UNSET_VAR}/files";
        assert_eq!(expand_env_vars(input), input);
        assert_eq!(expand_env_vars("no vars here"), "no vars here");
    }

    #[test]
    fn test_unterminated_placeholder_is_kept() {
        let url = "https://example.org/files/${WSI_SAMPLER_UNSET_VAR";
        assert_eq!(expand_env_vars(url), url);
        assert_eq!(
            expand_env_vars("${WSI_SAMPLER_UNSET_VAR}/a/${B"),
            "${WSI_SAMPLER_UNSET_VAR}/a/${B"
        );
        assert_eq!(expand_env_vars("$ {X} $$"), "$ {X} $$");

        if let Ok(path) = env::var("PATH") {
            assert_eq!(
                expand_env_vars("x=${PATH}/${B"),
                format!("x={}/${{B", path)
            );
        }
    }

    #[test]
    fn test_load_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(
            &path,
            r#"{"files": [{"path": "x.png", "url": "http://localhost/x.png"}]}"#,
        )
        .unwrap();

        let manifest = load_manifest_or_default(Some(&path)).unwrap();
        assert_eq!(manifest.files[0].path, "x.png");
    }

    #[test]
    fn test_sampler_config_validation() {
        let config = SamplerConfig {
            size: 256,
            level: 0,
            positive_class: 2,
            negative_class: 7,
            spot_radius: 25.0,
            positive_fraction: 0.5,
            seed: None,
        };
        assert!(config.validate().is_ok());

        assert!(SamplerConfig { size: 0, ..config.clone() }.validate().is_err());
        assert!(
            SamplerConfig {
                positive_fraction: 1.5,
                ..config.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            SamplerConfig {
                spot_radius: 0.0,
                ..config
            }
            .validate()
            .is_err()
        );
    }
}
