//! The write-ahead log: a fixed-capacity byte file operated as a ring
//! buffer.
//!
//! Log numbers are 64-bit monotonic absolute byte positions; the file
//! offset of a record is its number modulo the capacity. Every record
//! starts with a `{type: u32, num: u64}` header whose `num` must equal the
//! position it was read from — a mismatch means the ring wrapped over that
//! region and the reader has run off the valid tail.
//!
//! Committed transactions are bracketed BEGIN .. END; recovery replays only
//! complete brackets. A CHECKPOINT record carries the log number the
//! on-disk snapshot is durable through, and the ring may reuse bytes up to
//! the last checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::index::{RelationIndex, Tuple};
use crate::intern::{Atom, Interner, Sym};
use crate::oplist::{Op, OpList};

/// Bytes of a record header on disk: type u32 + num u64, little-endian.
const HEADER_SIZE: u64 = 12;
/// Bytes of a modification header: five i32 lengths.
const MOD_HEADER_SIZE: u64 = 20;
/// Length sentinel marking a 4-byte integer payload instead of a string.
const INT_LEN: i32 = -1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RecordType {
    Begin,
    End,
    Writing,
    Checkpoint,
    Add,
    Del,
    Wrap,
    Init,
}

impl RecordType {
    fn to_u32(self) -> u32 {
        match self {
            RecordType::Begin => 1,
            RecordType::End => 2,
            RecordType::Writing => 3,
            RecordType::Checkpoint => 4,
            RecordType::Add => 5,
            RecordType::Del => 6,
            RecordType::Wrap => 7,
            RecordType::Init => 8,
        }
    }

    fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => RecordType::Begin,
            2 => RecordType::End,
            3 => RecordType::Writing,
            4 => RecordType::Checkpoint,
            5 => RecordType::Add,
            6 => RecordType::Del,
            7 => RecordType::Wrap,
            8 => RecordType::Init,
            _ => return None,
        })
    }
}

pub(crate) struct Wal {
    file: File,
    capacity: u64,
    sync_writes: bool,
    /// Snapshot on disk is durable through this log number.
    pub(crate) last_checkpoint: u64,
    /// Log number the in-progress or most recent snapshot corresponds to.
    pub(crate) last_synced: u64,
    /// Position of the most recently written record header.
    pub(crate) last_logpoint: u64,
    /// Position the next record header will be written at.
    next_logpoint: u64,
}

impl Wal {
    pub(crate) fn open(path: &Path, capacity: u64, sync_writes: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StoreError::LogOpen)?;

        let mut wal = Self {
            file,
            capacity,
            sync_writes,
            last_checkpoint: 0,
            last_synced: 0,
            last_logpoint: 0,
            next_logpoint: 0,
        };

        let len = wal.file.metadata()?.len();
        if len == 0 {
            wal.reset()?;
        } else if len != capacity {
            return Err(StoreError::Corrupt(format!(
                "log file is {len} bytes, expected {capacity}"
            )));
        }
        Ok(wal)
    }

    /// Blank the ring and write a fresh INIT record at position 0.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.set_len(self.capacity)?;
        self.last_checkpoint = 0;
        self.last_synced = 0;
        self.last_logpoint = 0;
        self.next_logpoint = 0;
        self.write_header(RecordType::Init, 0)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Position the counters at the checkpoint a loaded snapshot carries.
    pub(crate) fn init_points(&mut self, checkpoint: u64) {
        self.last_checkpoint = checkpoint;
        self.last_synced = checkpoint;
        self.last_logpoint = checkpoint;
        self.next_logpoint = checkpoint + HEADER_SIZE;
    }

    /// Bytes of log the ring has accumulated past the reusable horizon.
    pub(crate) fn needs_snapshot(&self) -> bool {
        self.next_logpoint - self.last_checkpoint > self.capacity / 2
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Write a record header, wrapping to offset 0 first when the record
    /// (plus room for one further header) would run past the capacity.
    fn write_header(&mut self, ty: RecordType, payload_size: u64) -> Result<()> {
        let mut pos = self.next_logpoint % self.capacity;
        let mut round = self.next_logpoint / self.capacity;

        if pos + payload_size > self.capacity - 2 * HEADER_SIZE {
            let mut buf = [0u8; HEADER_SIZE as usize];
            encode_header(&mut buf, RecordType::Wrap, pos + round * self.capacity);
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.write_all(&buf)?;
            pos = 0;
            round += 1;
        }

        let mut buf = [0u8; HEADER_SIZE as usize];
        encode_header(&mut buf, ty, pos + round * self.capacity);
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&buf)?;

        self.last_logpoint = self.next_logpoint;
        self.next_logpoint = (pos + HEADER_SIZE) + round * self.capacity + payload_size;
        Ok(())
    }

    fn append_mod(&mut self, ty: RecordType, tuple: &Tuple, interner: &Interner) -> Result<()> {
        let key_a = interner.resolve_str(tuple.key_a);
        let key_b = interner.resolve_str(tuple.key_b);
        let src = interner.resolve_str(tuple.src);
        let val_a = resolve_val(interner, tuple.val_a);
        let val_b = resolve_val(interner, tuple.val_b);

        let payload = MOD_HEADER_SIZE
            + key_a.len() as u64
            + val_a.size()
            + key_b.len() as u64
            + val_b.size()
            + src.len() as u64;
        self.write_header(ty, payload)?;

        let mut mod_header = [0u8; MOD_HEADER_SIZE as usize];
        mod_header[0..4].copy_from_slice(&(key_a.len() as i32).to_le_bytes());
        mod_header[4..8].copy_from_slice(&val_a.len_field().to_le_bytes());
        mod_header[8..12].copy_from_slice(&(key_b.len() as i32).to_le_bytes());
        mod_header[12..16].copy_from_slice(&val_b.len_field().to_le_bytes());
        mod_header[16..20].copy_from_slice(&(src.len() as i32).to_le_bytes());
        self.file.write_all(&mod_header)?;

        self.file.write_all(key_a.as_bytes())?;
        val_a.write(&mut self.file)?;
        self.file.write_all(key_b.as_bytes())?;
        val_b.write(&mut self.file)?;
        self.file.write_all(src.as_bytes())?;
        Ok(())
    }

    /// Size the whole oplist will occupy, including the BEGIN/END bracket,
    /// a possible WRAP header, and the wrap allowance of the largest record.
    fn estimate(&self, ops: &OpList, interner: &Interner) -> (u64, bool) {
        let mut total = 0u64;
        let mut largest = 0u64;
        let mut has_writing = false;

        for op in ops.ops() {
            let size = match op {
                Op::Add(tuple) | Op::Del(tuple) => {
                    let key_a = interner.resolve_str(tuple.key_a);
                    let key_b = interner.resolve_str(tuple.key_b);
                    let src = interner.resolve_str(tuple.src);
                    HEADER_SIZE
                        + MOD_HEADER_SIZE
                        + key_a.len() as u64
                        + key_b.len() as u64
                        + src.len() as u64
                        + resolve_val(interner, tuple.val_a).size()
                        + resolve_val(interner, tuple.val_b).size()
                }
                Op::Writing => {
                    has_writing = true;
                    HEADER_SIZE
                }
            };
            largest = largest.max(size);
            total += size;
        }

        if total == 0 {
            return (0, has_writing);
        }
        (total + 3 * HEADER_SIZE + largest, has_writing)
    }

    /// Append a committed transaction's oplist as one BEGIN .. END bracket.
    ///
    /// Refuses with `LogFull` when the record would overwrite bytes the
    /// last checkpoint has not released yet, except when the oplist carries
    /// the snapshot sentinel: the snapshot being written already reflects
    /// this transaction, so the record may be skipped.
    pub(crate) fn append(&mut self, ops: &OpList, interner: &Interner) -> Result<()> {
        let (size, has_writing) = self.estimate(ops, interner);
        if size == 0 {
            return Ok(());
        }

        if has_writing {
            self.last_synced = self.last_logpoint;
        }
        if self.next_logpoint + size > self.last_checkpoint + self.capacity {
            if has_writing {
                return Ok(());
            }
            return Err(StoreError::LogFull);
        }

        self.write_header(RecordType::Begin, 0)?;
        for op in ops.ops() {
            match op {
                Op::Add(tuple) => self.append_mod(RecordType::Add, tuple, interner)?,
                Op::Del(tuple) => self.append_mod(RecordType::Del, tuple, interner)?,
                Op::Writing => self.write_header(RecordType::Writing, 0)?,
            }
        }
        self.write_header(RecordType::End, 0)?;
        self.sync()
    }

    /// Bracket a CHECKPOINT record announcing that the snapshot is durable
    /// through `last_synced`, releasing ring space behind it.
    pub(crate) fn write_checkpoint(&mut self) -> Result<()> {
        self.write_header(RecordType::Begin, 0)?;
        self.write_header(RecordType::Checkpoint, 8)?;
        self.file.write_all(&self.last_synced.to_le_bytes())?;
        self.last_checkpoint = self.last_synced;
        self.write_header(RecordType::End, 0)?;
        self.sync()?;
        debug!(checkpoint = self.last_checkpoint, "checkpoint recorded");
        Ok(())
    }

    /// Replay everything committed since the checkpoint the counters were
    /// initialized at.
    ///
    /// `reload` is called when the header at `last_logpoint` no longer
    /// matches its position — the ring wrapped past the reader — and must
    /// reload the snapshot from scratch, returning its checkpoint number.
    pub(crate) fn recover<F>(
        &mut self,
        index: &mut RelationIndex,
        interner: &Interner,
        mut reload: F,
    ) -> Result<()>
    where
        F: FnMut(&mut RelationIndex, &Interner) -> Result<u64>,
    {
        self.file
            .seek(SeekFrom::Start(self.last_logpoint % self.capacity))?;
        let anchored = matches!(
            self.read_header()?,
            Some((_, num)) if num == self.last_logpoint
        );
        if !anchored {
            warn!("log wrapped past the loaded checkpoint, re-reading the database file");
            let checkpoint = reload(index, interner)?;
            self.init_points(checkpoint);
        }

        let mut last_valid = self.last_logpoint;
        self.next_logpoint = self.last_logpoint + HEADER_SIZE;
        let mut pos = self.next_logpoint % self.capacity;
        let mut round = self.next_logpoint / self.capacity;
        self.file.seek(SeekFrom::Start(pos))?;

        let mut oplist: Option<OpList> = None;
        let mut new_checkpoint: Option<u64> = None;
        let mut new_synced: Option<u64> = None;
        let mut replayed = 0usize;

        loop {
            let Some((raw_type, num)) = self.read_header()? else {
                break;
            };
            if num != pos + round * self.capacity {
                break;
            }
            let Some(ty) = RecordType::from_u32(raw_type) else {
                break;
            };

            self.last_logpoint = self.next_logpoint;
            match ty {
                RecordType::Wrap => {
                    round += 1;
                    self.file.seek(SeekFrom::Start(0))?;
                }
                RecordType::Add | RecordType::Del => {
                    let Some(list) = oplist.as_mut() else {
                        break;
                    };
                    let Some(tuple) = self.read_mod(interner)? else {
                        break;
                    };
                    if ty == RecordType::Add {
                        list.push_add(tuple);
                    } else {
                        list.push_del(tuple);
                    }
                }
                RecordType::Checkpoint => {
                    let Some(number) = self.read_u64()? else {
                        break;
                    };
                    new_checkpoint = Some(number);
                }
                RecordType::Writing => {
                    new_synced = Some(self.last_logpoint);
                }
                RecordType::Begin => {
                    oplist = Some(OpList::new());
                    new_checkpoint = None;
                    new_synced = None;
                }
                RecordType::End => {
                    if let Some(list) = oplist.take() {
                        list.replay(index, interner);
                        replayed += 1;
                        if let Some(number) = new_checkpoint {
                            self.last_checkpoint = number;
                            self.last_synced = number;
                        } else if let Some(number) = new_synced {
                            self.last_synced = number;
                        }
                        last_valid = self.last_logpoint;
                    }
                }
                RecordType::Init => {}
            }

            pos = self.file.stream_position()?;
            self.next_logpoint = pos + round * self.capacity;
        }

        debug!(transactions = replayed, "log replay finished");
        self.last_logpoint = last_valid;
        self.next_logpoint = last_valid + HEADER_SIZE;
        self.file
            .seek(SeekFrom::Start(self.next_logpoint % self.capacity))?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<Option<(u32, u64)>> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        if !self.read_exact_opt(&mut buf)? {
            return Ok(None);
        }
        let ty = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let num = u64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        Ok(Some((ty, num)))
    }

    fn read_u64(&mut self) -> Result<Option<u64>> {
        let mut buf = [0u8; 8];
        if !self.read_exact_opt(&mut buf)? {
            return Ok(None);
        }
        Ok(Some(u64::from_le_bytes(buf)))
    }

    fn read_mod(&mut self, interner: &Interner) -> Result<Option<Tuple>> {
        let mut header = [0u8; MOD_HEADER_SIZE as usize];
        if !self.read_exact_opt(&mut header)? {
            return Ok(None);
        }
        let mut lens = [0i32; 5];
        for (i, len) in lens.iter_mut().enumerate() {
            *len = i32::from_le_bytes([
                header[i * 4],
                header[i * 4 + 1],
                header[i * 4 + 2],
                header[i * 4 + 3],
            ]);
        }
        let [ka_len, va_len, kb_len, vb_len, s_len] = lens;

        let Some(key_a) = self.read_str(interner, ka_len)? else {
            return Ok(None);
        };
        let Some(val_a) = self.read_val(interner, va_len)? else {
            return Ok(None);
        };
        let Some(key_b) = self.read_str(interner, kb_len)? else {
            return Ok(None);
        };
        let Some(val_b) = self.read_val(interner, vb_len)? else {
            return Ok(None);
        };
        let Some(src) = self.read_str(interner, s_len)? else {
            return Ok(None);
        };
        Ok(Some(Tuple {
            key_a,
            val_a,
            key_b,
            val_b,
            src,
        }))
    }

    fn read_str(&mut self, interner: &Interner, len: i32) -> Result<Option<Sym>> {
        if len < 0 || len as u64 > self.capacity {
            return Ok(None);
        }
        let mut buf = vec![0u8; len as usize];
        if !self.read_exact_opt(&mut buf)? {
            return Ok(None);
        }
        match String::from_utf8(buf) {
            Ok(s) => Ok(Some(interner.intern_str(&s))),
            Err(_) => Ok(None),
        }
    }

    fn read_val(&mut self, interner: &Interner, len: i32) -> Result<Option<Atom>> {
        if len == INT_LEN {
            let mut buf = [0u8; 4];
            if !self.read_exact_opt(&mut buf)? {
                return Ok(None);
            }
            let i = i32::from_le_bytes(buf);
            interner.intern_int(i);
            return Ok(Some(Atom::Int(i)));
        }
        Ok(self.read_str(interner, len)?.map(Atom::Str))
    }

    fn read_exact_opt(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut read = 0usize;
        while read < buf.len() {
            let n = self.file.read(&mut buf[read..])?;
            if n == 0 {
                return Ok(false);
            }
            read += n;
        }
        Ok(true)
    }
}

fn encode_header(buf: &mut [u8; HEADER_SIZE as usize], ty: RecordType, num: u64) {
    buf[0..4].copy_from_slice(&ty.to_u32().to_le_bytes());
    buf[4..12].copy_from_slice(&num.to_le_bytes());
}

enum WalValue {
    Int(i32),
    Str(std::sync::Arc<str>),
}

impl WalValue {
    fn size(&self) -> u64 {
        match self {
            WalValue::Int(_) => 4,
            WalValue::Str(s) => s.len() as u64,
        }
    }

    fn len_field(&self) -> i32 {
        match self {
            WalValue::Int(_) => INT_LEN,
            WalValue::Str(s) => s.len() as i32,
        }
    }

    fn write(&self, file: &mut File) -> Result<()> {
        match self {
            WalValue::Int(i) => file.write_all(&i.to_le_bytes())?,
            WalValue::Str(s) => file.write_all(s.as_bytes())?,
        }
        Ok(())
    }
}

fn resolve_val(interner: &Interner, atom: Atom) -> WalValue {
    match atom {
        Atom::Int(i) => WalValue::Int(i),
        Atom::Str(sym) => WalValue::Str(interner.resolve_str(sym)),
    }
}
