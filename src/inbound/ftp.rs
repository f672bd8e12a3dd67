use std::{
    fs,
    path::Path,
    time::Duration,
};

use log::{debug, info};
use suppaftp::{FtpStream, Mode};

use crate::{
    BatchError, config::FtpConfig, core::partition::matches_pattern,
    inbound::InboundSynchronizer,
};

/// Downloads the files of a remote FTP folder matching a pattern.
///
/// Files already present locally are left untouched, so an archive is fetched
/// once even when the remote side keeps it.
pub struct FtpSynchronizer {
    host: String,
    port: u16,
    username: String,
    password: String,
    remote_folder: String,
    pattern: String,
    passive_mode: bool,
    timeout: Duration,
}

impl FtpSynchronizer {
    fn connect(&self) -> Result<FtpStream, BatchError> {
        let mut ftp_stream =
            FtpStream::connect(format!("{}:{}", self.host, self.port)).map_err(|e| {
                BatchError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("Failed to connect to FTP server: {}", e),
                ))
            })?;

        ftp_stream
            .login(&self.username, &self.password)
            .map_err(|e| BatchError::Configuration(format!("FTP login failed: {}", e)))?;

        ftp_stream
            .get_ref()
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| BatchError::Configuration(format!("Failed to set read timeout: {}", e)))?;
        ftp_stream
            .get_ref()
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| {
                BatchError::Configuration(format!("Failed to set write timeout: {}", e))
            })?;

        let mode = if self.passive_mode {
            Mode::Passive
        } else {
            Mode::Active
        };
        ftp_stream.set_mode(mode);

        Ok(ftp_stream)
    }

    fn download(&self, ftp_stream: &mut FtpStream, local_directory: &Path) -> Result<usize, BatchError> {
        let files = ftp_stream.nlst(Some(self.remote_folder.as_str())).map_err(|e| {
            BatchError::Io(std::io::Error::other(format!(
                "Failed to list remote directory {}: {}",
                self.remote_folder, e
            )))
        })?;

        let mut copied = 0;
        for file_path in files {
            let file_name = Path::new(&file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&file_path)
                .to_string();

            if !matches_pattern(&file_name, &self.pattern) {
                continue;
            }

            let local_path = local_directory.join(&file_name);
            if local_path.exists() {
                debug!("Already synchronized: {}", local_path.display());
                continue;
            }

            let remote_full_path = if self.remote_folder.is_empty() {
                file_name.clone()
            } else {
                format!("{}/{}", self.remote_folder.trim_end_matches('/'), file_name)
            };

            let data = ftp_stream.retr_as_buffer(&remote_full_path).map_err(|e| {
                BatchError::Io(std::io::Error::other(format!(
                    "Failed to download {}: {}",
                    remote_full_path, e
                )))
            })?;

            info!(
                "Downloading file: {} -> {}",
                remote_full_path,
                local_path.display()
            );
            fs::write(&local_path, data.into_inner())?;
            copied += 1;
        }

        Ok(copied)
    }
}

impl InboundSynchronizer for FtpSynchronizer {
    fn synchronize(&self, local_directory: &Path) -> Result<usize, BatchError> {
        info!(
            "Synchronizing {}:{}{} -> {}",
            self.host,
            self.port,
            self.remote_folder,
            local_directory.display()
        );

        let mut ftp_stream = self.connect()?;
        let result = self.download(&mut ftp_stream, local_directory);

        let _ = ftp_stream.quit();

        result
    }
}

/// Builder for [`FtpSynchronizer`].
///
/// # Examples
///
/// ```rust,no_run
/// use batch_import::inbound::ftp::FtpSynchronizerBuilder;
///
/// # fn example() -> Result<(), batch_import::BatchError> {
/// let synchronizer = FtpSynchronizerBuilder::new()
///     .host("ftp.example.com")
///     .username("import")
///     .password("secret")
///     .remote_folder("/outbound")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct FtpSynchronizerBuilder {
    host: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    remote_folder: String,
    pattern: String,
    passive_mode: bool,
    timeout: Duration,
}

impl Default for FtpSynchronizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpSynchronizerBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            port: 21,
            username: None,
            password: None,
            remote_folder: String::new(),
            pattern: super::DEFAULT_ARCHIVE_PATTERN.to_string(),
            passive_mode: true,
            timeout: Duration::from_secs(30),
        }
    }

    /// Starts from the connection settings of an import configuration.
    pub fn from_config(config: &FtpConfig) -> Self {
        Self::new()
            .host(config.host.as_str())
            .port(config.port)
            .username(config.username.as_str())
            .password(config.password.as_str())
            .remote_folder(config.remote_folder.as_str())
            .passive_mode(config.passive_mode)
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn remote_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.remote_folder = folder.into();
        self
    }

    pub fn pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Sets whether to use passive mode.
    pub fn passive_mode(mut self, passive: bool) -> Self {
        self.passive_mode = passive;
        self
    }

    /// Sets the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<FtpSynchronizer, BatchError> {
        let host = self
            .host
            .ok_or_else(|| BatchError::Configuration("FTP host is required".to_string()))?;
        let username = self
            .username
            .ok_or_else(|| BatchError::Configuration("FTP username is required".to_string()))?;
        let password = self
            .password
            .ok_or_else(|| BatchError::Configuration("FTP password is required".to_string()))?;

        Ok(FtpSynchronizer {
            host,
            port: self.port,
            username,
            password,
            remote_folder: self.remote_folder,
            pattern: self.pattern,
            passive_mode: self.passive_mode,
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_credentials() {
        let result = FtpSynchronizerBuilder::new().host("localhost").build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));

        let result = FtpSynchronizerBuilder::new()
            .username("user")
            .password("pass")
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(msg)) if msg.contains("host")));
    }

    #[test]
    fn builder_defaults() {
        let synchronizer = FtpSynchronizerBuilder::new()
            .host("localhost")
            .username("user")
            .password("pass")
            .build()
            .unwrap();

        assert_eq!(synchronizer.port, 21);
        assert_eq!(synchronizer.pattern, "*.zip");
        assert!(synchronizer.passive_mode);
        assert_eq!(synchronizer.timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_from_config() {
        let config = FtpConfig {
            host: "ftp.example.com".to_string(),
            port: 2121,
            username: "import".to_string(),
            password: "secret".to_string(),
            remote_folder: "/outbound".to_string(),
            passive_mode: false,
        };

        let synchronizer = FtpSynchronizerBuilder::from_config(&config).build().unwrap();

        assert_eq!(synchronizer.host, "ftp.example.com");
        assert_eq!(synchronizer.port, 2121);
        assert_eq!(synchronizer.username, "import");
        assert_eq!(synchronizer.remote_folder, "/outbound");
        assert_eq!(synchronizer.pattern, "*.zip");
        assert!(!synchronizer.passive_mode);
    }

    #[test]
    fn unreachable_server_is_an_io_error() {
        let synchronizer = FtpSynchronizerBuilder::new()
            .host("127.0.0.1")
            .port(1)
            .username("user")
            .password("pass")
            .build()
            .unwrap();

        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = synchronizer.synchronize(temp_dir.path());

        assert!(matches!(result, Err(BatchError::Io(_))));
    }
}
