mod vault;

pub use vault::{CONFIG_FILE, PolicyConfig, VaultConfig};
