/// Loading a unit of work from the watched file.
///
/// The file declares its capabilities in directive comments:
///
/// ```text
/// # reloader: entrypoint = python3 {file}
/// # reloader: cleanup = sh ./reset.sh
/// ```
///
/// Any comment leader (`#`, `//`, `--`, `;`) may precede a directive. The
/// first directive of each kind wins.
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::command::CommandSpec;
use crate::error::{BoxError, Capability};

/// A zero-argument operation provided by the loaded unit.
pub trait Invocable: Send + Sync + 'static {
    /// Run the operation to completion on the calling thread.
    fn invoke(&self) -> Result<(), BoxError>;
}

impl<F> Invocable for F
where
    F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn invoke(&self) -> Result<(), BoxError> {
        self()
    }
}

/// The handles obtained from one load of the watched file.
#[derive(Default)]
pub struct LoadedUnit {
    pub entrypoint: Option<Arc<dyn Invocable>>,
    pub cleanup: Option<Arc<dyn Invocable>>,
}

/// Errors produced while loading the watched file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed `{capability}` directive: {reason}")]
    Malformed {
        capability: Capability,
        reason: String,
    },
}

/// Turns a file path into entrypoint and cleanup handles.
pub trait Loader {
    fn load(&self, path: &Path) -> Result<LoadedUnit, LoadError>;
}

/// Directive lines: `<comment> reloader: <capability> = <command>`.
static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#|//|--|;)+\s*reloader:\s*(entrypoint|cleanup)\s*=(.*)$").unwrap()
});

/// Commands declared by a file's directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub entrypoint: Option<CommandSpec>,
    pub cleanup: Option<CommandSpec>,
}

/// Scan `text` for directives, expanding `{file}` to `path`.
pub fn parse_directives(text: &str, path: &Path) -> Result<Directives, LoadError> {
    let mut directives = Directives::default();
    for line in text.lines() {
        let Some(caps) = DIRECTIVE.captures(line) else {
            continue;
        };
        let capability = match &caps[1] {
            "entrypoint" => Capability::Entrypoint,
            _ => Capability::Cleanup,
        };
        let slot = match capability {
            Capability::Entrypoint => &mut directives.entrypoint,
            Capability::Cleanup => &mut directives.cleanup,
        };
        if slot.is_some() {
            tracing::debug!(%capability, line, "ignoring repeated directive");
            continue;
        }
        let spec = CommandSpec::parse(&caps[2], path).ok_or_else(|| LoadError::Malformed {
            capability,
            reason: "command is empty".to_string(),
        })?;
        *slot = Some(spec);
    }
    Ok(directives)
}

/// Reads directives from the watched file on every load.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveLoader;

impl DirectiveLoader {
    pub fn read(&self, path: &Path) -> Result<Directives, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_directives(&text, path)
    }
}

impl Loader for DirectiveLoader {
    fn load(&self, path: &Path) -> Result<LoadedUnit, LoadError> {
        let directives = self.read(path)?;
        tracing::debug!(
            entrypoint = ?directives.entrypoint.as_ref().map(ToString::to_string),
            cleanup = ?directives.cleanup.as_ref().map(ToString::to_string),
            "loaded directives"
        );
        Ok(LoadedUnit {
            entrypoint: directives
                .entrypoint
                .map(|spec| Arc::new(spec) as Arc<dyn Invocable>),
            cleanup: directives
                .cleanup
                .map(|spec| Arc::new(spec) as Arc<dyn Invocable>),
        })
    }
}
