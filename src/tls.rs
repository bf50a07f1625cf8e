use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::TlsError;

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Checks that `cert_path` holds at least one certificate and `key_path` a
/// private key, before handing the paths to warp.
pub fn preflight(cert_path: &Path, key_path: &Path) -> Result<usize, TlsError> {
    let mut cert_reader = open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key_reader = open(key_path)?;
    match rustls_pemfile::private_key(&mut key_reader) {
        Ok(Some(_)) => Ok(certs.len()),
        Ok(None) => Err(TlsError::NoPrivateKey(key_path.to_path_buf())),
        Err(source) => Err(TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        }),
    }
}
