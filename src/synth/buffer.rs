//! Block-sized scratch buffers owned by a pipeline.

/// Largest block the engine will run.
pub const MAX_BLOCK: usize = 4096;

static SILENT: [f32; MAX_BLOCK] = [0.0; MAX_BLOCK];

/// A read-only block of zeros `frames` long.
pub fn silent(frames: usize) -> &'static [f32] {
    &SILENT[..frames.min(MAX_BLOCK)]
}

/// Handle to one buffer in a pipeline's [Scratch] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufId(usize);

impl BufId {
    /// Always zero. May be bound to inputs only.
    pub const SILENCE: BufId = BufId(0);
    /// Instrument output, cleared before every block.
    pub const LEFT: BufId = BufId(1);
    pub const RIGHT: BufId = BufId(2);
    /// Device input for the block. May be bound to inputs only.
    pub const INPUT_LEFT: BufId = BufId(3);
    pub const INPUT_RIGHT: BufId = BufId(4);

    const RESERVED: [&'static str; 5] = ["silence", "left", "right", "input-left", "input-right"];

    pub fn index(self) -> usize {
        self.0
    }

    /// Buffers no operator may write.
    pub fn is_read_only(self) -> bool {
        matches!(self, BufId::SILENCE | BufId::INPUT_LEFT | BufId::INPUT_RIGHT)
    }
}

/// `dst = dst * dst_gain + src * src_gain`. With a zero `dst_gain` the old
/// contents are ignored rather than scaled.
#[inline]
pub fn merge(dst: &mut [f32], dst_gain: f32, src: &[f32], src_gain: f32) {
    if dst_gain == 0.0 {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s * src_gain;
        }
    } else if dst_gain == 1.0 {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s * src_gain;
        }
    } else {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = *d * dst_gain + s * src_gain;
        }
    }
}

/// Mean square of a block.
pub fn energy(buf: &[f32]) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }
    buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32
}

pub fn peak(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Arena of equally sized buffers indexed by [BufId].
#[derive(Debug)]
pub struct Scratch {
    frames: usize,
    buffers: Vec<Vec<f32>>,
    names: Vec<&'static str>,
}

impl Scratch {
    pub fn new(frames: usize) -> Self {
        let mut scratch = Self {
            frames,
            buffers: Vec::new(),
            names: Vec::new(),
        };
        for name in BufId::RESERVED {
            scratch.add(name);
        }
        scratch
    }

    pub fn add(&mut self, name: &'static str) -> BufId {
        self.buffers.push(vec![0.0; self.frames]);
        self.names.push(name);
        BufId(self.buffers.len() - 1)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn contains(&self, id: BufId) -> bool {
        id.0 < self.buffers.len()
    }

    pub fn name(&self, id: BufId) -> &'static str {
        self.names.get(id.0).copied().unwrap_or("?")
    }

    #[inline]
    pub fn get(&self, id: BufId) -> &[f32] {
        &self.buffers[id.0]
    }

    /// None for the read-only buffers.
    #[inline]
    pub fn get_mut(&mut self, id: BufId) -> Option<&mut [f32]> {
        if id.is_read_only() {
            return None;
        }
        self.buffers.get_mut(id.0).map(Vec::as_mut_slice)
    }

    /// Writes to a read-only buffer are ignored.
    pub fn fill(&mut self, id: BufId, value: f32) {
        if id.is_read_only() {
            return;
        }
        self.buffers[id.0].fill(value);
    }

    pub fn copy(&mut self, dst: BufId, src: BufId) {
        self.merge(dst, 0.0, src, 1.0);
    }

    /// See [merge]. `dst` and `src` may be the same buffer. A read-only
    /// `dst` is left untouched.
    pub fn merge(&mut self, dst: BufId, dst_gain: f32, src: BufId, src_gain: f32) {
        if dst.is_read_only() {
            return;
        }
        if dst == src {
            let gain = dst_gain + src_gain;
            for sample in self.buffers[dst.0].iter_mut() {
                *sample *= gain;
            }
            return;
        }
        let (d, s) = if dst.0 < src.0 {
            let (head, tail) = self.buffers.split_at_mut(src.0);
            (&mut head[dst.0], &tail[0])
        } else {
            let (head, tail) = self.buffers.split_at_mut(dst.0);
            (&mut tail[0], &head[src.0])
        };
        merge(d, dst_gain, s, src_gain);
    }

    /// Moves a buffer out so it can be borrowed mutably alongside others.
    /// Must be paired with [Scratch::restore]. Does not allocate.
    pub(crate) fn take(&mut self, id: BufId) -> Vec<f32> {
        std::mem::take(&mut self.buffers[id.0])
    }

    pub(crate) fn restore(&mut self, id: BufId, buffer: Vec<f32>) {
        self.buffers[id.0] = buffer;
    }

    /// Writes device input into the reserved input buffers.
    pub(crate) fn load_input(&mut self, left: &[f32], right: &[f32]) {
        copy_padded(&mut self.buffers[BufId::INPUT_LEFT.0], left);
        copy_padded(&mut self.buffers[BufId::INPUT_RIGHT.0], right);
    }
}

fn copy_padded(dst: &mut [f32], src: &[f32]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_buffers() {
        let scratch = Scratch::new(16);
        assert_eq!(scratch.len(), 5);
        assert_eq!(scratch.name(BufId::LEFT), "left");
        assert!(BufId::SILENCE.is_read_only());
        assert!(!BufId::RIGHT.is_read_only());
    }

    #[test]
    fn merge_in_both_orders() {
        let mut scratch = Scratch::new(4);
        let a = scratch.add("a");
        let b = scratch.add("b");
        scratch.fill(a, 1.0);
        scratch.fill(b, 2.0);
        scratch.merge(a, 1.0, b, 0.5);
        assert_eq!(scratch.get(a), &[2.0; 4]);
        scratch.merge(b, 0.0, a, 3.0);
        assert_eq!(scratch.get(b), &[6.0; 4]);
        scratch.merge(b, 0.5, b, 0.0);
        assert_eq!(scratch.get(b), &[3.0; 4]);
    }

    #[test]
    fn silence_cannot_be_written() {
        let mut scratch = Scratch::new(4);
        let a = scratch.add("a");
        scratch.fill(a, 1.0);
        scratch.fill(BufId::SILENCE, 1.0);
        scratch.merge(BufId::SILENCE, 1.0, a, 1.0);
        assert_eq!(scratch.get(BufId::SILENCE), &[0.0; 4]);
    }

    #[test]
    fn device_input_cannot_be_written() {
        let mut scratch = Scratch::new(4);
        let a = scratch.add("a");
        scratch.fill(a, 1.0);
        scratch.load_input(&[0.5; 4], &[0.25; 4]);
        for input in [BufId::INPUT_LEFT, BufId::INPUT_RIGHT] {
            assert!(input.is_read_only());
            assert!(scratch.get_mut(input).is_none());
            scratch.fill(input, 9.0);
            scratch.merge(input, 0.0, a, 1.0);
        }
        assert_eq!(scratch.get(BufId::INPUT_LEFT), &[0.5; 4]);
        assert_eq!(scratch.get(BufId::INPUT_RIGHT), &[0.25; 4]);
        assert!(scratch.get_mut(a).is_some());
    }

    #[test]
    fn take_and_restore_keeps_storage() {
        let mut scratch = Scratch::new(8);
        let a = scratch.add("a");
        let before = scratch.get(a).as_ptr();
        let taken = scratch.take(a);
        assert!(scratch.get(a).is_empty());
        scratch.restore(a, taken);
        assert_eq!(scratch.get(a).as_ptr(), before);
    }
}
