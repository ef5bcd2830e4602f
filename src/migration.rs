//! Migration files and the migration directory.
//!
//! Files are named `<14-digit version>_<slug>.sql` and hold an up and a down
//! section between goose marker comments.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigroError, MigroResult};
use crate::transpiler::MigrationScript;

const MARK_UP: &str = "-- +goose Up";
const MARK_DOWN: &str = "-- +goose Down";
const MARK_BEGIN: &str = "-- +goose StatementBegin";
const MARK_END: &str = "-- +goose StatementEnd";

/// Slug prefix reserved for placeholder migrations.
pub const PLACEHOLDER_PREFIX: &str = "temp_";

/// Sortable 14-digit migration version (`YYYYMMDDhhmmss`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MigrationVersion(u64);

impl MigrationVersion {
    const MIN: u64 = 10_000_000_000_000;
    const MAX: u64 = 99_999_999_999_999;

    /// Wrap a number that has exactly 14 digits.
    pub fn new(value: u64) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Version for a point in time. `None` outside years 1000..=9999, where
    /// the stamp is not 14 digits.
    pub fn from_datetime(at: DateTime<Utc>) -> Option<Self> {
        let stamp = at.format("%Y%m%d%H%M%S").to_string();
        stamp.parse().ok().and_then(Self::new)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The next version after this one.
    pub fn succ(&self) -> Self {
        Self((self.0 + 1).min(Self::MAX))
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:014}", self.0)
    }
}

impl FromStr for MigrationVersion {
    type Err = MigroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MigroError::Parse {
                file: s.to_string(),
                message: "migration version must be 14 digits".to_string(),
            });
        }
        let value: u64 = s.parse().map_err(|_| MigroError::Parse {
            file: s.to_string(),
            message: "migration version out of range".to_string(),
        })?;
        Self::new(value).ok_or_else(|| MigroError::Parse {
            file: s.to_string(),
            message: "migration version out of range".to_string(),
        })
    }
}

/// Split `<version>_<slug>.sql` into its parts. Anything else is not a migration.
pub fn parse_file_name(name: &str) -> Option<(MigrationVersion, &str)> {
    let stem = name.strip_suffix(".sql")?;
    let (version, slug) = stem.split_once('_')?;
    if slug.is_empty() {
        return None;
    }
    let version = version.parse().ok()?;
    Some((version, slug))
}

/// The up/down bodies of a migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationBody {
    pub up: String,
    pub down: String,
}

impl MigrationBody {
    /// Read the sections back out of a rendered file.
    ///
    /// Statement markers are dropped; an up marker is required, a missing down
    /// section reads as empty.
    pub fn parse(file: &str, content: &str) -> MigroResult<Self> {
        let malformed = |message: &str| MigroError::Parse {
            file: file.to_string(),
            message: message.to_string(),
        };

        let mut up: Option<Vec<&str>> = None;
        let mut down: Option<Vec<&str>> = None;

        for line in content.lines() {
            match line.trim() {
                MARK_UP => {
                    if up.is_some() {
                        return Err(malformed("duplicate up marker"));
                    }
                    up = Some(Vec::new());
                }
                MARK_DOWN => {
                    if up.is_none() {
                        return Err(malformed("down marker before up marker"));
                    }
                    if down.is_some() {
                        return Err(malformed("duplicate down marker"));
                    }
                    down = Some(Vec::new());
                }
                MARK_BEGIN | MARK_END => {}
                _ => {
                    let section = match (&mut up, &mut down) {
                        (_, Some(d)) => d,
                        (Some(u), None) => u,
                        (None, None) => continue,
                    };
                    section.push(line);
                }
            }
        }

        let up = up.ok_or_else(|| malformed("missing up marker"))?;
        Ok(Self {
            up: up.join("\n").trim().to_string(),
            down: down.unwrap_or_default().join("\n").trim().to_string(),
        })
    }
}

/// A migration ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: MigrationVersion,
    pub slug: String,
    pub body: MigrationBody,
}

impl MigrationFile {
    pub fn new(version: MigrationVersion, script: MigrationScript) -> Self {
        Self {
            version,
            slug: script.slug,
            body: MigrationBody {
                up: script.up,
                down: script.down,
            },
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.version, self.slug)
    }

    pub fn is_placeholder(&self) -> bool {
        self.slug.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Full file content with marker comments.
    pub fn render(&self) -> String {
        format!(
            "{MARK_UP}\n{MARK_BEGIN}\n{}\n{MARK_END}\n\n{MARK_DOWN}\n{MARK_BEGIN}\n{}\n{MARK_END}\n",
            self.body.up, self.body.down
        )
    }
}

/// A migration file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMigration {
    pub version: MigrationVersion,
    pub slug: String,
    pub path: PathBuf,
}

impl LocalMigration {
    pub fn is_placeholder(&self) -> bool {
        self.slug.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn read_body(&self) -> MigroResult<MigrationBody> {
        let content = fs::read_to_string(&self.path)?;
        MigrationBody::parse(&self.path.display().to_string(), &content)
    }
}

/// The directory holding migration files.
#[derive(Debug, Clone)]
pub struct MigrationDir {
    path: PathBuf,
}

impl MigrationDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed migration file, ordered by version then slug.
    ///
    /// A directory that does not exist yet holds no migrations.
    pub fn entries(&self) -> MigroResult<Vec<LocalMigration>> {
        let reader = match fs::read_dir(&self.path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((version, slug)) = parse_file_name(name) {
                entries.push(LocalMigration {
                    version,
                    slug: slug.to_string(),
                    path: entry.path(),
                });
            }
        }

        entries.sort_by(|a, b| (a.version, &a.slug).cmp(&(b.version, &b.slug)));
        Ok(entries)
    }

    /// Sorted set of local versions.
    pub fn versions(&self) -> MigroResult<BTreeSet<MigrationVersion>> {
        Ok(self.entries()?.into_iter().map(|e| e.version).collect())
    }

    /// The file carrying this slug under any version.
    pub fn find_slug(&self, slug: &str) -> MigroResult<Option<LocalMigration>> {
        Ok(self.entries()?.into_iter().find(|e| e.slug == slug))
    }

    /// Every file carrying this version.
    pub fn find_version(&self, version: MigrationVersion) -> MigroResult<Vec<LocalMigration>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.version == version)
            .collect())
    }

    pub fn placeholders(&self) -> MigroResult<Vec<LocalMigration>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.is_placeholder())
            .collect())
    }

    /// Allocate a version strictly greater than every local one.
    pub fn next_version(&self, now: DateTime<Utc>) -> MigroResult<MigrationVersion> {
        let candidate = MigrationVersion::from_datetime(now).ok_or_else(|| {
            MigroError::validation(now.to_rfc3339(), "clock is outside the 14-digit version range")
        })?;
        Ok(match self.versions()?.last() {
            Some(newest) if candidate <= *newest => newest.succ(),
            _ => candidate,
        })
    }

    /// Write a file, whole-content. Never overwrites.
    pub fn write(&self, file: &MigrationFile) -> MigroResult<PathBuf> {
        fs::create_dir_all(&self.path)?;
        let path = self.path.join(file.file_name());
        if path.exists() {
            return Err(MigroError::Conflict(format!(
                "{} already exists",
                path.display()
            )));
        }
        fs::write(&path, file.render())?;
        tracing::debug!(path = %path.display(), "wrote migration");
        Ok(path)
    }

    /// Guard the slug, allocate a version and write the script.
    pub fn create(&self, script: MigrationScript, now: DateTime<Utc>) -> MigroResult<PathBuf> {
        if let Some(existing) = self.find_slug(&script.slug)? {
            return Err(MigroError::Conflict(format!(
                "a migration for '{}' already exists: {}",
                script.slug,
                existing.path.display()
            )));
        }
        let version = self.next_version(now)?;
        self.write(&MigrationFile::new(version, script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn v(n: u64) -> MigrationVersion {
        MigrationVersion::new(n).unwrap()
    }

    fn script(slug: &str) -> MigrationScript {
        MigrationScript {
            slug: slug.to_string(),
            up: "SELECT 1;".to_string(),
            down: "SELECT 2;".to_string(),
        }
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("20250707100918".parse::<MigrationVersion>().unwrap().value(), 20250707100918);
        assert!("2025070710091".parse::<MigrationVersion>().is_err());
        assert!("2025070710091x".parse::<MigrationVersion>().is_err());
        assert!(MigrationVersion::new(42).is_none());
        assert_eq!(v(20250707100918).to_string(), "20250707100918");
    }

    #[test]
    fn test_version_from_datetime() {
        let at = Utc.with_ymd_and_hms(2025, 7, 7, 10, 9, 18).unwrap();
        assert_eq!(MigrationVersion::from_datetime(at), Some(v(20250707100918)));
        let early = Utc.with_ymd_and_hms(999, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(MigrationVersion::from_datetime(early), None);

        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path());
        assert!(matches!(dir.next_version(early), Err(MigroError::Validation { .. })));
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("20250707100918_create_users.sql"),
            Some((v(20250707100918), "create_users"))
        );
        assert_eq!(parse_file_name("20250707100918_.sql"), None);
        assert_eq!(parse_file_name("1_create_users.sql"), None);
        assert_eq!(parse_file_name("20250707100918_create_users.sql.bak"), None);
        assert_eq!(parse_file_name("README.md"), None);
    }

    #[test]
    fn test_render_and_parse_body() {
        let file = MigrationFile::new(v(20250707100918), script("create_users"));
        assert_eq!(file.file_name(), "20250707100918_create_users.sql");
        assert_eq!(
            file.render(),
            "-- +goose Up\n-- +goose StatementBegin\nSELECT 1;\n-- +goose StatementEnd\n\n-- +goose Down\n-- +goose StatementBegin\nSELECT 2;\n-- +goose StatementEnd\n"
        );

        let body = MigrationBody::parse("f.sql", &file.render()).unwrap();
        assert_eq!(body, file.body);
    }

    #[test]
    fn test_parse_body_without_statement_markers() {
        let body = MigrationBody::parse(
            "f.sql",
            "-- +goose Up\nCREATE TABLE a(id int);\n-- +goose Down\nDROP TABLE a;\n",
        )
        .unwrap();
        assert_eq!(body.up, "CREATE TABLE a(id int);");
        assert_eq!(body.down, "DROP TABLE a;");
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(matches!(
            MigrationBody::parse("f.sql", "SELECT 1;"),
            Err(MigroError::Parse { .. })
        ));
        assert!(MigrationBody::parse("f.sql", "-- +goose Down\n-- +goose Up\n").is_err());
        assert!(MigrationBody::parse("f.sql", "-- +goose Up\n-- +goose Up\n").is_err());
    }

    #[test]
    fn test_dir_listing_is_strict_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path());
        fs::write(tmp.path().join("20250102000000_b.sql"), "").unwrap();
        fs::write(tmp.path().join("20250101000000_a.sql"), "").unwrap();
        fs::write(tmp.path().join("20250103000000_temp_c.sql"), "").unwrap();
        fs::write(tmp.path().join("notes.sql"), "").unwrap();
        fs::create_dir(tmp.path().join("queries")).unwrap();

        let slugs: Vec<_> = dir.entries().unwrap().into_iter().map(|e| e.slug).collect();
        assert_eq!(slugs, vec!["a", "b", "temp_c"]);
        assert_eq!(dir.placeholders().unwrap().len(), 1);
        assert_eq!(dir.find_version(v(20250102000000)).unwrap()[0].slug, "b");
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path().join("nope"));
        assert!(dir.versions().unwrap().is_empty());
    }

    #[test]
    fn test_next_version_is_monotonic() {
        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path());
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(dir.next_version(now).unwrap(), v(20250101000000));

        fs::write(tmp.path().join("20300101000000_future.sql"), "").unwrap();
        assert_eq!(dir.next_version(now).unwrap(), v(20300101000001));
    }

    #[test]
    fn test_create_guards_slug() {
        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path().join("migrations"));
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let path = dir.create(script("create_users"), now).unwrap();
        assert!(path.ends_with("20250101000000_create_users.sql"));

        let err = dir.create(script("create_users"), now).unwrap_err();
        assert!(matches!(err, MigroError::Conflict(_)));
        assert_eq!(dir.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_write_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let dir = MigrationDir::new(tmp.path());
        let file = MigrationFile::new(v(20250101000000), script("a"));
        dir.write(&file).unwrap();
        assert!(dir.write(&file).is_err());
    }
}
