//! 128-bit signatures used for change detection.
//!
//! Two things are signed: file contents, to tell whether a file whose
//! timestamp moved actually changed, and the expanded command lines of a task,
//! to tell whether the work a task would do changed since it last ran.

use std::path::Path;

const UNIT_SEPARATOR: u8 = 0x1F;

/// A 128-bit digest, compared byte-for-byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Signature(pub [u8; 16]);

impl Signature {
    /// Signature of an in-memory buffer.
    pub fn of(buffer: impl AsRef<[u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(buffer.as_ref());
        Self::finish(&hasher)
    }

    /// Signature of a file's contents, read through a memory map when the
    /// file is large enough for that to pay off.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_mmap(path)?;
        Ok(Self::finish(&hasher))
    }

    fn finish(hasher: &blake3::Hasher) -> Self {
        let mut out = [0u8; 16];
        hasher.finalize_xof().fill(&mut out);
        Signature(out)
    }

    /// Build a signature from a database blob; None if the blob has the wrong size.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Signature(arr))
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(32);
        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }
        acc
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Signs a task by the command lines its actions would run.
/// Returns None for a task with no actions, which has nothing to sign.
pub fn sign_commands<'a>(commands: impl IntoIterator<Item = &'a str>) -> Option<Signature> {
    let mut hasher = blake3::Hasher::new();
    let mut any = false;
    for command in commands {
        any = true;
        hasher.update(command.as_bytes());
        hasher.update(&[UNIT_SEPARATOR]);
    }
    if !any {
        return None;
    }
    Some(Signature::finish(&hasher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_signature() {
        assert_eq!(Signature::of("abc"), Signature::of(b"abc".to_vec()));
        assert_ne!(Signature::of("abc"), Signature::of("abd"));
        assert_eq!(Signature::of("abc").to_hex().len(), 32);
    }

    #[test]
    fn command_signature() {
        assert_eq!(sign_commands(Vec::<&str>::new()), None);
        let one = sign_commands(["cc -c a.c"]);
        assert!(one.is_some());
        assert_eq!(one, sign_commands(["cc -c a.c"]));
        // The separator keeps command boundaries significant.
        assert_ne!(sign_commands(["ab", "c"]), sign_commands(["a", "bc"]));
    }

    #[test]
    fn blob_roundtrip() {
        let sig = Signature::of("x");
        assert_eq!(Signature::from_slice(&sig.0), Some(sig));
        assert_eq!(Signature::from_slice(&[1, 2, 3]), None);
    }
}
