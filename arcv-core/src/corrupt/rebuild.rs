//! Content substitution: the one corruption that leaves a self-consistent
//! container. The target entry's bytes change, it is recompressed with its
//! original method, and its local header, central record, every later local
//! header offset and the end record are rewritten to match. Only an external
//! digest can tell the result apart from a genuine archive.

use std::io::{self, Cursor, Write};

use fastrand::Rng;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{pick, put_u32, sound_entries, CorruptionType, DetectionLayer, Mutation, Sound};
use crate::container::{
    field, le_u16, le_u32, Layout, FLAG_DATA_DESCRIPTOR, METHOD_DEFLATE, SIG_DATA_DESCRIPTOR,
};
use crate::error::{Error, Result};

const LABEL: &str = "content-substitution";

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    enc.finish()
}

fn zip32(v: u64, what: &str) -> Result<u32> {
    u32::try_from(v)
        .ok()
        .filter(|&v| v != u32::MAX)
        .ok_or_else(|| Error::injection(LABEL, format!("rebuilt {what} {v} needs zip64")))
}

fn clear_descriptor_flag(bytes: &mut [u8], at: u64) {
    let at = at as usize;
    let flags = le_u16(&bytes[at..]) & !FLAG_DATA_DESCRIPTOR;
    bytes[at..at + 2].copy_from_slice(&flags.to_le_bytes());
}

pub(super) fn substitute_content(
    bytes: &[u8],
    layout: &Layout,
    rng: &mut Rng,
) -> Result<(Vec<u8>, Mutation)> {
    if layout.zip64_eocd_offset.is_some() || layout.entries.iter().any(|e| e.zip64) {
        return Err(Error::injection(LABEL, "zip64 archives cannot be rebuilt"));
    }
    let sound = sound_entries(bytes, layout);
    let files: Vec<&Sound> =
        sound.iter().filter(|s| !s.entry.is_dir() && s.entry.uncompressed_size > 0).collect();
    let target = *pick(rng, &files, CorruptionType::ContentSubstitution, "non-empty file entry")?;
    let entry = target.entry;

    let mut content = Vec::with_capacity(entry.uncompressed_size as usize);
    layout
        .check_entry(&mut Cursor::new(bytes), entry, &mut |c| content.extend_from_slice(c))
        .map_err(|f| Error::injection(LABEL, f.to_string()))?;

    let run = rng.usize(1..=content.len().min(16));
    let start = rng.usize(0..=content.len() - run);
    for b in &mut content[start..start + run] {
        *b ^= rng.u8(1..);
    }

    let data = if entry.method == METHOD_DEFLATE {
        deflate(&content).map_err(|e| Error::injection(LABEL, e.to_string()))?
    } else {
        content.clone()
    };
    let crc = crc32fast::hash(&content);
    let compressed = zip32(data.len() as u64, "compressed size")?;

    // Old local region: header, name, extra, data, optional descriptor.
    let region_start = entry.lfh_offset;
    let data_end = target.local.data_offset + entry.compressed_size;
    let descriptor_len = if target.local.uses_data_descriptor() {
        let at = data_end as usize;
        if bytes.get(at..at + 4).map(le_u32) == Some(SIG_DATA_DESCRIPTOR) {
            16
        } else {
            12
        }
    } else {
        0
    };
    let region_end = data_end + descriptor_len;
    if region_end > layout.cd_offset {
        return Err(Error::injection(LABEL, "data descriptor overruns the central directory"));
    }

    let mut local = bytes[region_start as usize..target.local.data_offset as usize].to_vec();
    clear_descriptor_flag(&mut local, field::LFH_FLAGS);
    put_u32(&mut local, field::LFH_CRC32, crc);
    put_u32(&mut local, field::LFH_COMPRESSED, compressed);
    put_u32(&mut local, field::LFH_UNCOMPRESSED, zip32(content.len() as u64, "size")?);
    let new_data_offset = region_start + local.len() as u64;
    local.extend_from_slice(&data);

    let old_len = region_end - region_start;
    let new_len = local.len() as u64;
    let shift = |pos: u64| if pos >= region_end { pos - old_len + new_len } else { pos };

    let mut out = Vec::with_capacity(bytes.len() - old_len as usize + local.len());
    out.extend_from_slice(&bytes[..region_start as usize]);
    out.extend_from_slice(&local);
    out.extend_from_slice(&bytes[region_end as usize..]);

    for e in &layout.entries {
        if e.lfh_offset >= region_end {
            let moved = zip32(shift(e.lfh_offset), "local header offset")?;
            put_u32(&mut out, shift(e.central_field(field::CDFH_LFH_OFFSET)), moved);
        }
    }
    clear_descriptor_flag(&mut out, shift(entry.central_field(field::CDFH_FLAGS)));
    put_u32(&mut out, shift(entry.central_field(field::CDFH_CRC32)), crc);
    put_u32(&mut out, shift(entry.central_field(field::CDFH_COMPRESSED)), compressed);
    let cd_offset = zip32(shift(layout.cd_offset), "central directory offset")?;
    put_u32(&mut out, shift(layout.eocd_offset) + field::EOCD_CD_OFFSET, cd_offset);

    let rebuilt = Layout::read(&mut Cursor::new(out.as_slice()))
        .map_err(|f| Error::injection(LABEL, format!("rebuilt container does not open: {f}")))?;
    let moved = rebuilt
        .entries
        .get(entry.index)
        .ok_or_else(|| Error::injection(LABEL, "rebuilt container lost an entry"))?;
    rebuilt
        .check_entry(&mut Cursor::new(out.as_slice()), moved, &mut |_| {})
        .map_err(|f| Error::injection(LABEL, format!("rebuilt entry fails its check: {f}")))?;

    Ok((
        out,
        Mutation {
            target_offset: new_data_offset,
            length: run as u64,
            target_entry: Some(entry.name.clone()),
            expected_layer: DetectionLayer::ExternalDigest,
            description: format!(
                "{run} byte(s) of {} content replaced at content offset {start}; entry recompressed, crc32 {:08x} -> {crc:08x}",
                entry.name, entry.crc32
            ),
        },
    ))
}
