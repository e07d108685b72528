//! Opcode constants and a non-executing instruction walker.

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction<'a> {
    /// Any data push, including `OP_0` with an empty payload.
    Push { opcode: u8, data: &'a [u8] },
    Op(u8),
}

/// Walks a script one instruction at a time. A push whose length runs past
/// the end of the script yields `None` and ends the walk; `truncated()` then
/// reports it.
pub struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    truncated: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(script: &'a [u8]) -> Self {
        Self {
            script,
            cursor: 0,
            truncated: false,
        }
    }

    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.cursor.checked_add(len)?;
        let out = self.script.get(self.cursor..end)?;
        self.cursor = end;
        Some(out)
    }

    fn take_len(&mut self, width: usize) -> Option<usize> {
        let bytes = self.take(width)?;
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(bytes);
        Some(u32::from_le_bytes(buf) as usize)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.truncated || self.cursor >= self.script.len() {
            return None;
        }
        let opcode = self.script[self.cursor];
        self.cursor += 1;
        let len = match opcode {
            OP_0..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => self.take_len(1),
            OP_PUSHDATA2 => self.take_len(2),
            OP_PUSHDATA4 => self.take_len(4),
            _ => return Some(Instruction::Op(opcode)),
        };
        match len.and_then(|len| self.take(len)) {
            Some(data) => Some(Instruction::Push { opcode, data }),
            None => {
                self.truncated = true;
                None
            }
        }
    }
}

/// True when every instruction is a push or a small-integer opcode.
pub fn is_push_only(script: &[u8]) -> bool {
    let mut walker = Instructions::new(script);
    let all_pushes = walker.by_ref().all(|instruction| match instruction {
        Instruction::Push { .. } => true,
        Instruction::Op(op) => op == OP_1NEGATE || (OP_1..=OP_16).contains(&op),
    });
    all_pushes && !walker.truncated()
}

/// `OP_1`..`OP_16` to 1..16.
pub fn small_int(opcode: u8) -> Option<u8> {
    (OP_1..=OP_16)
        .contains(&opcode)
        .then(|| opcode - OP_1 + 1)
}

/// Assembles scripts with minimal push encodings.
#[derive(Default)]
pub struct Builder {
    bytes: Vec<u8>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    pub fn push_int(self, value: u8) -> Self {
        match value {
            0 => self.push_opcode(OP_0),
            1..=16 => self.push_opcode(OP_1 + value - 1),
            _ => self.push_slice(&[value]),
        }
    }

    pub fn push_slice(mut self, data: &[u8]) -> Self {
        match data.len() {
            len @ 0..=0x4b => self.bytes.push(len as u8),
            len @ 0x4c..=0xff => {
                self.bytes.push(OP_PUSHDATA1);
                self.bytes.push(len as u8);
            }
            len @ 0x100..=0xffff => {
                self.bytes.push(OP_PUSHDATA2);
                self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
            }
            len => {
                self.bytes.push(OP_PUSHDATA4);
                self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_every_push_form() {
        let script = Builder::new()
            .push_opcode(OP_0)
            .push_slice(&[0xaa; 3])
            .push_slice(&[0xbb; 80])
            .push_slice(&[0xcc; 300])
            .push_opcode(OP_CHECKSIG)
            .into_bytes();
        let lens: Vec<Option<usize>> = Instructions::new(&script)
            .map(|instruction| match instruction {
                Instruction::Push { data, .. } => Some(data.len()),
                Instruction::Op(_) => None,
            })
            .collect();
        assert_eq!(lens, vec![Some(0), Some(3), Some(80), Some(300), None]);
    }

    #[test]
    fn truncated_push_stops_the_walk() {
        let script = [0x05, 0x01, 0x02];
        let mut walker = Instructions::new(&script);
        assert_eq!(walker.next(), None);
        assert!(walker.truncated());
        assert!(!is_push_only(&script));
        assert!(!is_push_only(&[OP_PUSHDATA2, 0x01]));
    }

    #[test]
    fn push_only_accepts_small_ints() {
        assert!(is_push_only(&[]));
        assert!(is_push_only(&[OP_1, 0x01, 0xff, OP_1NEGATE]));
        assert!(!is_push_only(&[OP_DUP]));
    }
}
