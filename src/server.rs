mod install;
mod registry;

pub use registry::{
    CONFIG_FILE, EULA_FILE, InstanceRegistry, JVM_ARGS_FILE, LAUNCH_SCRIPT, RegistryConfig,
    STOP_COMMAND,
};
