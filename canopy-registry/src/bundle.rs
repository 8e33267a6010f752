//! Host bundle packing: the zip archive an enrolled peer downloads.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use canopy_ca::MeshCertificate;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::RegistryResult;

const CONFIG_ENTRY: &str = "config.toml";
const CERT_ENTRY: &str = "host.crt";
const KEY_ENTRY: &str = "host.key";
const CA_CERT_ENTRY: &str = "ca.crt";

/// Builds the bundle zip. The key entry is present only for hosts whose
/// key pair was generated server-side.
pub(crate) fn build(
    certificate: &MeshCertificate,
    key_b64: Option<&str>,
    ca_certificate: &MeshCertificate,
    config_toml: &str,
) -> RegistryResult<Vec<u8>> {
    let buf = std::io::Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(buf);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(CONFIG_ENTRY, options)?;
    zip.write_all(config_toml.as_bytes())?;

    zip.start_file(CERT_ENTRY, options)?;
    zip.write_all(certificate.encoded().as_bytes())?;

    if let Some(key) = key_b64 {
        zip.start_file(KEY_ENTRY, options)?;
        zip.write_all(key.as_bytes())?;
    }

    zip.start_file(CA_CERT_ENTRY, options)?;
    zip.write_all(ca_certificate.encoded().as_bytes())?;

    let finished = zip.finish()?;
    Ok(finished.into_inner())
}

/// An opened bundle, mainly for tests and tooling.
#[derive(Debug)]
pub struct HostBundle {
    pub config_toml: Option<String>,
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub ca_certificate: Option<String>,
}

impl HostBundle {
    /// Opens and parses a bundle from a reader.
    pub fn open<R: Read + Seek>(reader: R) -> RegistryResult<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();
            let mut data = String::new();
            file.read_to_string(&mut data)?;
            entries.insert(name, data);
        }
        Ok(Self {
            config_toml: entries.remove(CONFIG_ENTRY),
            certificate: entries.remove(CERT_ENTRY),
            key: entries.remove(KEY_ENTRY),
            ca_certificate: entries.remove(CA_CERT_ENTRY),
        })
    }
}
