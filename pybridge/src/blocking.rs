//! Synchronous interpreter handle.
//!
//! Wraps [`crate::Interp`] with a private current-thread tokio runtime; each
//! call blocks the calling thread until its exchange finishes. Do not use it
//! from inside an async context: `block_on` panics there.

use std::process::ExitStatus;

use serde::{Serialize, de::DeserializeOwned};
use tokio::runtime::{Builder, Runtime};

use crate::error::Result;
use crate::interp::{self, InterpBuilder};

pub struct Interp {
    // Dropped before the runtime so the child's pipes deregister first.
    inner: interp::Interp,
    runtime: Runtime,
}

impl Interp {
    pub fn new() -> Result<Self> {
        Self::from_builder(InterpBuilder::new())
    }

    pub fn from_builder(builder: InterpBuilder) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let inner = builder.build()?;
        Ok(Self { inner, runtime })
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn id(&self) -> Option<u32> {
        self.inner.id()
    }

    pub fn start(&mut self) -> Result<()> {
        let _guard = self.runtime.enter();
        self.inner.start()
    }

    pub fn run(&mut self, script: &str) -> Result<String> {
        self.runtime.block_on(self.inner.run(script))
    }

    pub fn get(&mut self, name: &str) -> Result<serde_json::Value> {
        self.runtime.block_on(self.inner.get(name))
    }

    pub fn get_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        self.runtime.block_on(self.inner.get_as(name))
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        self.runtime.block_on(self.inner.set(name, value))
    }

    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.runtime.block_on(self.inner.wait())
    }

    pub fn shutdown(&mut self) -> Result<ExitStatus> {
        self.runtime.block_on(self.inner.shutdown())
    }

    pub fn close(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}
