//! Whole-file encryption helpers.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use crate::cipher::Cipher;

/// Encrypt `source` into `dest`, streaming.
///
/// Returns the number of plaintext bytes read. `dest` is created or
/// truncated.
pub fn encrypt_file<C: Cipher>(
    cipher: &C,
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> io::Result<u64> {
    let mut input = BufReader::new(File::open(source)?);
    let mut writer = cipher.encrypting_writer(BufWriter::new(File::create(dest)?))?;

    let copied = io::copy(&mut input, &mut writer)?;
    writer.finish()?;
    Ok(copied)
}

/// Decrypt `source` into `dest`, streaming.
///
/// Returns the number of plaintext bytes written. If decryption fails the
/// partially written `dest` is removed, so a failed call never leaves
/// unauthenticated plaintext behind.
pub fn decrypt_file<C: Cipher>(
    cipher: &C,
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> io::Result<u64> {
    let dest = dest.as_ref();
    let mut reader = cipher.decrypting_reader(BufReader::new(File::open(source)?))?;
    let mut output = BufWriter::new(File::create(dest)?);

    let result = io::copy(&mut reader, &mut output).and_then(|n| output.flush().map(|()| n));
    if result.is_err() {
        drop(output);
        let _ = fs::remove_file(dest);
    }
    result
}
