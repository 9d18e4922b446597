//! A built-in logger, enabled by the default Cargo feature
//! `builtin_env_logger`. Initialized once from [`crate::new_collector`]
//! so a binding gets useful log output with zero configuration; a binding
//! that wants its own logging integration disables the feature and
//! registers its own implementation with the `log` crate instead.

pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );
            match result {
                Ok(()) => log::debug!("initialized the logger."),
                Err(e) => log::debug!("failed to initialize the built-in env_logger: {e}"),
            }
        } else {
            log::debug!("didn't initialize the built-in env_logger; the Cargo feature \"builtin_env_logger\" is not enabled.");
        }
    }
}
