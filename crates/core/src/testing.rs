//! Helpers for building package archives in tests.

use flate2::Compression;
use flate2::write::GzEncoder;

/// Outer container format of a generated `.ipk`.
#[derive(Clone, Copy, Debug)]
pub enum Container {
    Ar,
    TarGz,
}

/// A minimal control stanza for `name` at `version`.
pub fn control_for(name: &str, version: &str) -> String {
    format!(
        "Package: {name}\nVersion: {version}\nArchitecture: all\nMaintainer: test@example.com\nDescription: {name} test package\n"
    )
}

/// Build an `.ipk` archive around the given control stanza.
pub fn build_ipk(control: &str, container: Container) -> Vec<u8> {
    let control_tarball = tarball(&[("./control", control.as_bytes())]);
    let data_tarball = tarball(&[("./usr/share/doc/README", b"payload".as_slice())]);
    let members: [(&str, &[u8]); 3] = [
        ("debian-binary", b"2.0\n"),
        ("control.tar.gz", &control_tarball),
        ("data.tar.gz", &data_tarball),
    ];

    match container {
        Container::Ar => {
            let mut out = Vec::new();
            {
                let mut builder = ar::Builder::new(&mut out);
                for (name, data) in members {
                    let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
                    builder
                        .append(&header, data)
                        .expect("failed to append ar member");
                }
            }
            out
        }
        Container::TarGz => {
            let prefixed: Vec<(String, &[u8])> = members
                .iter()
                .map(|(name, data)| (format!("./{name}"), *data))
                .collect();
            let entries: Vec<(&str, &[u8])> = prefixed
                .iter()
                .map(|(name, data)| (name.as_str(), *data))
                .collect();
            tarball(&entries)
        }
    }
}

/// Build a gzipped tarball with the given `(path, contents)` members.
pub fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *data)
            .expect("failed to append tar member");
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("failed to finish tarball")
}
