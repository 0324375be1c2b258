use crate::channel::DEFAULT_CAPACITY;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    channel_capacity: usize,
    cipher_list: Option<String>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            channel_capacity: DEFAULT_CAPACITY,
            cipher_list: None,
        }
    }

    /// Capacity of each direction of the in-memory channel.
    ///
    /// This bounds how much TLS output can be pending before the engine
    /// stalls on want-write, and how much input `put_input` accepts at once.
    #[inline(always)]
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// OpenSSL cipher list for TLS 1.2 and below.
    ///
    /// `None` keeps the library default.
    #[inline(always)]
    pub fn cipher_list(&self) -> Option<&str> {
        self.cipher_list.as_deref()
    }
}

/// Builder for engine configuration.
pub struct ConfigBuilder {
    channel_capacity: usize,
    cipher_list: Option<String>,
}

impl ConfigBuilder {
    /// Set the capacity of each channel direction in bytes.
    ///
    /// Clamped to at least 1. Defaults to 32000.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the cipher list, in OpenSSL syntax.
    ///
    /// An invalid list makes the first handshake fail. Defaults to the library
    /// default.
    pub fn cipher_list(mut self, list: impl Into<String>) -> Self {
        self.cipher_list = Some(list.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        Config {
            channel_capacity: self.channel_capacity,
            cipher_list: self.cipher_list,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}
