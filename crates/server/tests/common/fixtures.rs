//! Test fixtures for building repositories and client certificates.

use flate2::read::GzDecoder;
use larder_core::testing::{Container, build_ipk, control_for};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;
use std::io::Read;
use std::path::Path;

/// Write a valid package `<name>_<version>.ipk` into `dir` and return its bytes.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn write_package(dir: &Path, name: &str, version: &str) -> Vec<u8> {
    std::fs::create_dir_all(dir).expect("Failed to create package directory");
    let data = build_ipk(&control_for(name, version), Container::Ar);
    std::fs::write(dir.join(format!("{name}_{version}.ipk")), &data)
        .expect("Failed to write package");
    data
}

/// Write arbitrary file contents, creating parent directories.
#[allow(dead_code)]
pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create directory");
    }
    std::fs::write(path, contents).expect("Failed to write file");
}

/// Decompress a gzip body.
#[allow(dead_code)]
pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .expect("Invalid gzip data");
    out
}

/// DER certificate with the given subject attributes.
#[allow(dead_code)]
pub fn client_certificate(subject: &[(DnType, &str)]) -> CertificateDer<'static> {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("Invalid params");
    let mut dn = DistinguishedName::new();
    for (ty, value) in subject {
        dn.push(ty.clone(), *value);
    }
    params.distinguished_name = dn;
    let key = KeyPair::generate().expect("Failed to generate key");
    let cert = params.self_signed(&key).expect("Failed to sign certificate");
    CertificateDer::from(cert.der().to_vec())
}
