//! Feature module contract

use crate::fetch::FetchedSource;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a constructed module
pub type ModuleInstance = Arc<dyn Module>;

/// Factory that builds a module once its code and dependencies are available
pub type ModuleFactory = Arc<dyn Fn(ModuleContext) -> anyhow::Result<ModuleInstance> + Send + Sync>;

/// Access to the concrete type behind a module instance
pub trait AsAny {
    /// Borrow as `dyn Any` for downcasting
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A feature module.
///
/// The loader only constructs modules. Starting them is up to whoever
/// composes the application, after every module it needs is loaded.
pub trait Module: AsAny + Send + Sync + 'static {
    /// Optional start hook, called after construction
    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Concrete type name, for diagnostics
    fn module_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Module").field(&self.module_type()).finish()
    }
}

/// Downcast a module instance to its concrete type
pub fn downcast<T: Module>(instance: &ModuleInstance) -> Option<&T> {
    let module: &dyn Module = &**instance;
    AsAny::as_any(module).downcast_ref::<T>()
}

/// Everything a factory gets to build its module
pub struct ModuleContext {
    /// Name the module is registered under
    pub name: String,
    /// Locator the code was fetched from
    pub locator: String,
    /// The fetched code
    pub source: FetchedSource,
    /// Resolved dependencies, in declaration order
    pub dependencies: Vec<(String, ModuleInstance)>,
}

impl ModuleContext {
    /// Look up a resolved dependency by name
    pub fn dependency(&self, name: &str) -> Option<&ModuleInstance> {
        self.dependencies
            .iter()
            .find(|(dep, _)| dep == name)
            .map(|(_, instance)| instance)
    }
}
