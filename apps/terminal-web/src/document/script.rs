use super::{ControlEvent, Controller};
use crate::navigation::keys::parse_key_binding;
use mlua::Lua;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read script {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("script bound unrecognised key {0:?}")]
    InvalidKey(String),
}

#[derive(Debug)]
struct RawBinding {
    key: String,
    action: String,
    label: Option<String>,
}

/// Key bindings contributed by the startup script, shared by every session.
#[derive(Clone, Debug, Default)]
pub struct BindingTable {
    controllers: Vec<Controller>,
}

impl BindingTable {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let source = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_source(&path.display().to_string(), &source)?;
        info!(
            target: "terminal_web::document",
            script = %path.display(),
            bindings = table.len(),
            "loaded key bindings"
        );
        Ok(table)
    }

    /// Runs `source` with `bind(key, action, label?)` and `quit(key?)` in scope.
    pub fn from_source(name: &str, source: &str) -> Result<Self, ScriptError> {
        let collected = Arc::new(Mutex::new(Vec::<RawBinding>::new()));
        let lua = Lua::new();

        let sink = Arc::clone(&collected);
        let bind = lua.create_function(
            move |_, (key, action, label): (String, String, Option<String>)| {
                sink.lock().push(RawBinding { key, action, label });
                Ok(())
            },
        )?;
        lua.globals().set("bind", bind)?;

        let sink = Arc::clone(&collected);
        let quit = lua.create_function(move |_, key: Option<String>| {
            sink.lock().push(RawBinding {
                key: key.unwrap_or_else(|| "q".to_string()),
                action: "quit".to_string(),
                label: Some("Quit".to_string()),
            });
            Ok(())
        })?;
        lua.globals().set("quit", quit)?;

        lua.load(source).set_name(name).exec()?;
        drop(lua);

        let raw = std::mem::take(&mut *collected.lock());
        let controllers = raw
            .into_iter()
            .map(|binding| {
                let parsed = parse_key_binding(&binding.key)
                    .ok_or_else(|| ScriptError::InvalidKey(binding.key.clone()))?;
                Ok(Controller {
                    label: binding.label.unwrap_or_else(|| binding.action.clone()),
                    binding: parsed,
                    event: ControlEvent::from_action(&binding.action),
                })
            })
            .collect::<Result<Vec<_>, ScriptError>>()?;
        Ok(Self { controllers })
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
