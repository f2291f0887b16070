use tracing::debug;

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Teardown hooks registered while setting up a run. They run last-in first-out,
/// each exactly once, either through [`CleanupStack::run_all`] or on drop.
#[derive(Default)]
pub struct CleanupStack {
    hooks: Vec<(&'static str, CleanupFn)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push((name, Box::new(hook)));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run_all(&mut self) {
        while let Some((name, hook)) = self.hooks.pop() {
            debug!(hook = name, "running cleanup");
            hook();
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        self.run_all();
    }
}
