/// Environment hygiene for interpreter children
///
/// Children never inherit the service environment. They get a small,
/// deterministic set built here and nothing else.
use std::collections::BTreeMap;
use std::path::Path;

/// Loader variables that must never reach a child, even through an adapter.
pub const DANGEROUS_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_PROFILE",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PYTHONHOME",
];

/// Environment sanitization policy
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    pub path: String,
    pub locale: String,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        EnvPolicy {
            path: "/usr/local/bin:/usr/bin:/bin".to_string(),
            locale: "C.UTF-8".to_string(),
        }
    }
}

impl EnvPolicy {
    /// Base environment for a child whose working directory is `home`.
    pub fn base_environment(&self, home: &Path) -> BTreeMap<String, String> {
        let home = home.display().to_string();
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), self.path.clone());
        env.insert("LANG".to_string(), self.locale.clone());
        env.insert("LC_ALL".to_string(), self.locale.clone());
        env.insert("TMPDIR".to_string(), home.clone());
        env.insert("HOME".to_string(), home);
        env
    }
}

/// Drop anything in [`DANGEROUS_VARS`], logging what was removed.
pub fn sanitize(env: &mut BTreeMap<String, String>) {
    for var in DANGEROUS_VARS {
        if env.remove(*var).is_some() {
            log::info!("Removed dangerous environment variable: {}", var);
        }
    }
}

/// Flatten to `(key, value)` pairs in a stable order for `Command::envs`.
pub fn into_pairs(env: BTreeMap<String, String>) -> Vec<(String, String)> {
    env.into_iter().collect()
}
