use std::collections::BTreeMap;

use crate::config::CompositorConfig;
use crate::engine::RenderEngine;
use crate::error::CompositorError;
use crate::session::Session;

/// Independent canvases keyed by project name. Sessions share nothing: each
/// owns its own engine, surface, viewport and layers.
#[derive(Debug)]
pub struct Workspace<E: RenderEngine> {
    sessions: BTreeMap<String, Session<E>>,
}

impl<E: RenderEngine> Default for Workspace<E> {
    fn default() -> Self {
        Self {
            sessions: BTreeMap::new(),
        }
    }
}

impl<E: RenderEngine> Workspace<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        name: &str,
        engine: E,
        width: u32,
        height: u32,
        config: CompositorConfig,
    ) -> Result<&mut Session<E>, CompositorError> {
        if name.trim().is_empty() {
            return Err(CompositorError::init("project name cannot be empty"));
        }
        if self.sessions.contains_key(name) {
            return Err(CompositorError::init(format!(
                "project '{name}' is already open"
            )));
        }
        let session = Session::new(engine, width, height, config)?;
        tracing::info!(project = name, width, height, "project opened");
        Ok(self.sessions.entry(name.to_owned()).or_insert(session))
    }

    pub fn get(&self, name: &str) -> Option<&Session<E>> {
        self.sessions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Session<E>> {
        self.sessions.get_mut(name)
    }

    /// Close a project, releasing its resources, and return its engine.
    pub fn close(&mut self, name: &str) -> Option<E> {
        let session = self.sessions.remove(name)?;
        tracing::info!(project = name, "project closed");
        Some(session.close())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
