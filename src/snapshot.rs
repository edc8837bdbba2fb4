//! Snapshot of the full in-memory state to the main database file.
//!
//! The file carries the string table, the integer table, every stored
//! tuple (one record per logical relationship; both index directions are
//! rebuilt on load) and the log number the state is durable through. The
//! payload is crc32-guarded and the file is written to a sibling temp path
//! and renamed into place, so a torn write never replaces a good snapshot.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use crate::error::{Result, StoreError};
use crate::index::{RelationIndex, Tuple};
use crate::intern::{Atom, Interner, Sym};

const MAGIC: &[u8; 8] = b"QVRSNAP\0";
const VERSION: u32 = 1;

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;

pub(crate) fn write(
    path: &Path,
    index: &RelationIndex,
    interner: &Interner,
    checkpoint: u64,
) -> Result<()> {
    let mut tuples = Vec::new();
    for (key, val, bucket) in index.entries() {
        for right in &bucket.rights {
            // Each relationship is present in both directions; emit the
            // canonical one so the file holds each logical tuple once.
            if side_rank(key, val) <= side_rank(right.key, right.val) {
                tuples.push(Tuple {
                    key_a: key,
                    val_a: val,
                    key_b: right.key,
                    val_b: right.val,
                    src: right.src,
                });
            }
        }
    }
    // The tables must cover every atom the tuples reference before they
    // are dumped.
    for tuple in &tuples {
        for val in [tuple.val_a, tuple.val_b] {
            if let Atom::Int(i) = val {
                interner.intern_int(i);
            }
        }
    }

    let mut payload = Vec::new();
    payload.extend_from_slice(&checkpoint.to_le_bytes());

    let strings = interner.dump_strings();
    payload.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in &strings {
        payload.extend_from_slice(&(s.len() as u32).to_le_bytes());
        payload.extend_from_slice(s.as_bytes());
    }

    let ints = interner.dump_ints();
    payload.extend_from_slice(&(ints.len() as u32).to_le_bytes());
    for i in &ints {
        payload.extend_from_slice(&i.to_le_bytes());
    }

    // Canonical order: reload-then-rewrite reproduces the file bytes.
    tuples.sort_by_key(|t| {
        (
            side_rank(t.key_a, t.val_a),
            side_rank(t.key_b, t.val_b),
            t.src.0,
        )
    });
    payload.extend_from_slice(&(tuples.len() as u64).to_le_bytes());
    for tuple in &tuples {
        payload.extend_from_slice(&tuple.key_a.0.to_le_bytes());
        encode_atom(&mut payload, interner, tuple.val_a);
        payload.extend_from_slice(&tuple.key_b.0.to_le_bytes());
        encode_atom(&mut payload, interner, tuple.val_b);
        payload.extend_from_slice(&tuple.src.0.to_le_bytes());
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let tmp = tmp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(MAGIC)?;
    file.write_all(&VERSION.to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&payload)?;
    file.write_all(&checksum.to_le_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot into a fresh index, re-interning every atom. Returns
/// the checkpoint log number the snapshot carries.
pub(crate) fn load(path: &Path, index: &mut RelationIndex, interner: &Interner) -> Result<u64> {
    let bytes = fs::read(path)?;
    if bytes.len() < MAGIC.len() + 4 + 8 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Corrupt("bad database file magic".into()));
    }
    let mut cursor = Cursor {
        buf: &bytes[MAGIC.len()..],
        pos: 0,
    };
    let version = cursor.u32()?;
    if version != VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported database file version {version}"
        )));
    }
    let payload_len = cursor.u64()? as usize;
    let payload = cursor.take(payload_len)?;
    let stored_crc = cursor.u32()?;
    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(StoreError::Corrupt("database file checksum mismatch".into()));
    }

    let mut cursor = Cursor {
        buf: payload,
        pos: 0,
    };
    let checkpoint = cursor.u64()?;

    let string_count = cursor.u32()? as usize;
    let mut syms: Vec<Sym> = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        let len = cursor.u32()? as usize;
        let raw = cursor.take(len)?;
        let s = std::str::from_utf8(raw)
            .map_err(|_| StoreError::Corrupt("non-UTF-8 string in database file".into()))?;
        syms.push(interner.intern_str(s));
    }

    let int_count = cursor.u32()? as usize;
    let mut ints: Vec<i32> = Vec::with_capacity(int_count);
    for _ in 0..int_count {
        let i = cursor.i32()?;
        interner.intern_int(i);
        ints.push(i);
    }

    let tuple_count = cursor.u64()?;
    for _ in 0..tuple_count {
        let key_a = resolve_sym(&syms, cursor.u32()?)?;
        let val_a = decode_atom(&mut cursor, &syms, &ints)?;
        let key_b = resolve_sym(&syms, cursor.u32()?)?;
        let val_b = decode_atom(&mut cursor, &syms, &ints)?;
        let src = resolve_sym(&syms, cursor.u32()?)?;
        index.insert_edge(
            interner,
            &Tuple {
                key_a,
                val_a,
                key_b,
                val_b,
                src,
            },
        );
    }
    Ok(checkpoint)
}

/// Deterministic order over the two sides of a relationship, used only to
/// pick which direction the file stores.
fn side_rank(key: Sym, val: Atom) -> (u32, u8, u32) {
    match val {
        Atom::Int(i) => (key.0, TAG_INT, i as u32),
        Atom::Str(sym) => (key.0, TAG_STR, sym.0),
    }
}

fn encode_atom(payload: &mut Vec<u8>, interner: &Interner, atom: Atom) {
    match atom {
        Atom::Int(i) => {
            payload.push(TAG_INT);
            payload.extend_from_slice(&interner.intern_int(i).0.to_le_bytes());
        }
        Atom::Str(sym) => {
            payload.push(TAG_STR);
            payload.extend_from_slice(&sym.0.to_le_bytes());
        }
    }
}

fn decode_atom(cursor: &mut Cursor<'_>, syms: &[Sym], ints: &[i32]) -> Result<Atom> {
    let tag = cursor.u8()?;
    let id = cursor.u32()? as usize;
    match tag {
        TAG_INT => ints
            .get(id)
            .map(|i| Atom::Int(*i))
            .ok_or_else(|| StoreError::Corrupt("integer id out of range".into())),
        TAG_STR => syms
            .get(id)
            .map(|s| Atom::Str(*s))
            .ok_or_else(|| StoreError::Corrupt("string id out of range".into())),
        _ => Err(StoreError::Corrupt("unknown value tag".into())),
    }
}

fn resolve_sym(syms: &[Sym], id: u32) -> Result<Sym> {
    syms.get(id as usize)
        .copied()
        .ok_or_else(|| StoreError::Corrupt("string id out of range".into()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(interner: &Interner) -> RelationIndex {
        let mut index = RelationIndex::new();
        for (entry, prop, src) in [("a", "x", "1"), ("a", "y", "2"), ("b", "x", "2")] {
            index.insert_edge(
                interner,
                &Tuple {
                    key_a: interner.intern_str("entry"),
                    val_a: Atom::Str(interner.intern_str(entry)),
                    key_b: interner.intern_str("property"),
                    val_b: Atom::Str(interner.intern_str(prop)),
                    src: interner.intern_str(src),
                },
            );
        }
        index.insert_edge(
            interner,
            &Tuple {
                key_a: interner.intern_str("entry"),
                val_a: Atom::Str(interner.intern_str("a")),
                key_b: interner.intern_str("size"),
                val_b: Atom::Int(1441),
                src: interner.intern_str("1"),
            },
        );
        index
    }

    #[test]
    fn round_trip_preserves_tuples_and_checkpoint() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snap.db");

        let interner = Interner::new();
        let index = sample(&interner);
        write(&path, &index, &interner, 42).unwrap();

        let fresh = Interner::new();
        let mut reloaded = RelationIndex::new();
        let checkpoint = load(&path, &mut reloaded, &fresh).unwrap();
        assert_eq!(checkpoint, 42);
        assert_eq!(reloaded.entry_count(), index.entry_count());
        assert!(reloaded.contains(&Tuple {
            key_a: fresh.intern_str("entry"),
            val_a: Atom::Str(fresh.intern_str("a")),
            key_b: fresh.intern_str("size"),
            val_b: Atom::Int(1441),
            src: fresh.intern_str("1"),
        }));
    }

    #[test]
    fn reload_then_rewrite_is_byte_identical() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = dir.path().join("first.db");
        let second = dir.path().join("second.db");

        let interner = Interner::new();
        let index = sample(&interner);
        write(&first, &index, &interner, 7).unwrap();

        let fresh = Interner::new();
        let mut reloaded = RelationIndex::new();
        load(&first, &mut reloaded, &fresh).unwrap();
        write(&second, &reloaded, &fresh, 7).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snap.db");

        let interner = Interner::new();
        let index = sample(&interner);
        write(&path, &index, &interner, 0).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let flip = bytes.len() / 2;
        bytes[flip] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let fresh = Interner::new();
        let mut reloaded = RelationIndex::new();
        assert!(matches!(
            load(&path, &mut reloaded, &fresh),
            Err(StoreError::Corrupt(_))
        ));
    }
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| StoreError::Corrupt("truncated database file".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}
