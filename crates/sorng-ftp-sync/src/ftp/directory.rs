//! Directory operations: mkdir, rmdir, rename, delete.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpEntryKind;
use std::future::Future;
use std::pin::Pin;

impl FtpClient {
    // ─── MKD ─────────────────────────────────────────────────────

    /// Create a directory on the remote server.
    pub async fn mkdir(&mut self, path: &str) -> FtpResult<String> {
        let resp = self.expect_ok(&format!("MKD {}", path)).await?;
        // "257 \"/new/dir\" created"
        let text = resp.text();
        if let Some(start) = text.find('"') {
            if let Some(end) = text[start + 1..].find('"') {
                return Ok(text[start + 1..start + 1 + end].to_string());
            }
        }
        Ok(path.to_string())
    }

    /// Create a directory and all missing parents (FTP has no MKDIR -p).
    pub async fn mkdir_all(&mut self, path: &str) -> FtpResult<()> {
        let home = self.pwd().await?;
        let result = self.mkdir_all_inner(path).await;
        // Probing CWDs moved us around.
        if self.conn.is_some() {
            self.cwd(&home).await?;
        }
        result
    }

    async fn mkdir_all_inner(&mut self, path: &str) -> FtpResult<()> {
        let mut current = String::new();
        if path.starts_with('/') {
            current.push('/');
        }

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(component);

            let cwd_resp = self.execute(&format!("CWD {}", current)).await?;
            if cwd_resp.is_completion() {
                continue;
            }
            let mkd_resp = self.execute(&format!("MKD {}", current)).await?;
            // 550 here usually means another client created it first.
            if !mkd_resp.is_completion() && mkd_resp.code != 550 {
                return Err(FtpError::from_reply(mkd_resp.code, &mkd_resp.text()));
            }
        }
        Ok(())
    }

    // ─── RMD ─────────────────────────────────────────────────────

    /// Remove an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> FtpResult<()> {
        self.expect_ok(&format!("RMD {}", path)).await?;
        Ok(())
    }

    /// Recursively remove a directory and all its contents.
    pub fn rmdir_recursive<'a>(
        &'a mut self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = FtpResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.list(path).await?;

            for entry in entries {
                let full_path = if path.ends_with('/') {
                    format!("{}{}", path, entry.name)
                } else {
                    format!("{}/{}", path, entry.name)
                };

                match entry.kind {
                    FtpEntryKind::Directory => self.rmdir_recursive(&full_path).await?,
                    _ => self.delete(&full_path).await?,
                }
            }

            self.rmdir(path).await
        })
    }

    // ─── RNFR / RNTO ─────────────────────────────────────────────

    /// Rename (or move) a file or directory.
    pub async fn rename_path(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let rnfr = self.execute(&format!("RNFR {}", from)).await?;
        if !rnfr.is_intermediate() && !rnfr.is_completion() {
            return Err(FtpError::from_reply(rnfr.code, &rnfr.text()));
        }
        self.expect_ok(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    // ─── DELE ────────────────────────────────────────────────────

    /// Delete a remote file.
    pub async fn delete(&mut self, path: &str) -> FtpResult<()> {
        self.expect_ok(&format!("DELE {}", path)).await?;
        Ok(())
    }
}
