//! `ar`-style archives carrying configurations and support files.
//!
//! A configuration may arrive as a classic archive: the magic `!<arch>\n`
//! followed by members, each a 60-byte header (name, date, uid, gid, octal
//! mode, size) and data padded to even length. The member named `config`
//! holds the configuration text; other members (compiled packages, element
//! maps) feed requirement resolution. GNU-style long names are supported
//! through the `//` name table.

use thiserror::Error;

/// The archive magic.
pub const MAGIC: &[u8] = b"!<arch>\n";

const HEADER_SIZE: usize = 60;

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Member name.
    pub name: String,
    /// Modification date, seconds since the epoch.
    pub date: u64,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
    /// Permission bits.
    pub mode: u32,
    /// Member contents.
    pub data: Vec<u8>,
}

impl ArchiveMember {
    /// A member with the given name and data, zeroed metadata, mode 0644.
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        ArchiveMember {
            name: name.to_owned(),
            date: 0,
            uid: 0,
            gid: 0,
            mode: 0o644,
            data,
        }
    }
}

/// Archive parse failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArchiveError {
    /// The data does not start with `!<arch>\n`.
    #[error("not an archive: bad magic")]
    BadMagic,
    /// The data ends inside a header or member.
    #[error("truncated archive")]
    Truncated,
    /// A header field failed to parse.
    #[error("bad archive member header")]
    BadHeader,
    /// A long-name reference points outside the name table.
    #[error("bad archive name table reference")]
    BadNameTable,
}

fn field_str(header: &[u8], range: std::ops::Range<usize>) -> &str {
    std::str::from_utf8(&header[range])
        .unwrap_or("")
        .trim_end_matches([' ', '\0'])
}

fn field_num(header: &[u8], range: std::ops::Range<usize>, radix: u32) -> Result<u64, ArchiveError> {
    let text = field_str(header, range);
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, radix).map_err(|_| ArchiveError::BadHeader)
}

/// Parses an archive into its members. The `//` name table, if present, is
/// consumed and not returned.
pub fn parse(data: &[u8]) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let rest = data.strip_prefix(MAGIC).ok_or(ArchiveError::BadMagic)?;
    let mut members = Vec::new();
    let mut name_table: Option<Vec<u8>> = None;
    let mut pos = 0;

    while pos < rest.len() {
        // Stray padding newline between members.
        if rest[pos..].len() == 1 && rest[pos] == b'\n' {
            break;
        }
        if rest[pos..].len() < HEADER_SIZE {
            return Err(ArchiveError::Truncated);
        }
        let header = &rest[pos..pos + HEADER_SIZE];
        if &header[58..60] != b"`\n" {
            return Err(ArchiveError::BadHeader);
        }
        let size = field_num(header, 48..58, 10)? as usize;
        let body_start = pos + HEADER_SIZE;
        if rest.len() < body_start + size {
            return Err(ArchiveError::Truncated);
        }
        let body = &rest[body_start..body_start + size];
        pos = body_start + size + (size & 1);

        let raw_name = field_str(header, 0..16);
        if raw_name == "//" {
            name_table = Some(body.to_vec());
            continue;
        }
        let name = if let Some(offset) = raw_name.strip_prefix('/').and_then(|o| o.parse::<usize>().ok()) {
            let table = name_table.as_deref().ok_or(ArchiveError::BadNameTable)?;
            if offset >= table.len() {
                return Err(ArchiveError::BadNameTable);
            }
            let entry = &table[offset..];
            let end = entry
                .iter()
                .position(|&b| b == b'\n' || b == b'/')
                .unwrap_or(entry.len());
            String::from_utf8_lossy(&entry[..end]).into_owned()
        } else {
            raw_name.trim_end_matches('/').to_owned()
        };

        members.push(ArchiveMember {
            name,
            date: field_num(header, 16..28, 10)?,
            uid: field_num(header, 28..34, 10)? as u32,
            gid: field_num(header, 34..40, 10)? as u32,
            mode: field_num(header, 40..48, 8)? as u32,
            data: body.to_vec(),
        });
    }
    Ok(members)
}

/// Serializes members into archive form, emitting a `//` name table when
/// any name exceeds the 16-byte header field.
pub fn unparse(members: &[ArchiveMember]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    let mut table = Vec::new();
    let mut long_name_offsets = Vec::new();
    for member in members {
        if member.name.len() > 15 {
            long_name_offsets.push(Some(table.len()));
            table.extend_from_slice(member.name.as_bytes());
            table.extend_from_slice(b"/\n");
        } else {
            long_name_offsets.push(None);
        }
    }

    let mut write_member = |name: &str, date: u64, uid: u32, gid: u32, mode: u32, data: &[u8], out: &mut Vec<u8>| {
        out.extend_from_slice(format!("{:<16}", name).as_bytes());
        out.extend_from_slice(format!("{:<12}", date).as_bytes());
        out.extend_from_slice(format!("{:<6}", uid).as_bytes());
        out.extend_from_slice(format!("{:<6}", gid).as_bytes());
        out.extend_from_slice(format!("{:<8}", format!("{:o}", mode)).as_bytes());
        out.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
        out.extend_from_slice(b"`\n");
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    };

    if !table.is_empty() {
        let table_data = table.clone();
        write_member("//", 0, 0, 0, 0, &table_data, &mut out);
    }
    for (member, long) in members.iter().zip(&long_name_offsets) {
        let name = match long {
            Some(offset) => format!("/{}", offset),
            None => member.name.clone(),
        };
        write_member(&name, member.date, member.uid, member.gid, member.mode, &member.data, &mut out);
    }
    out
}

/// Finds the member named `name`.
pub fn find<'a>(members: &'a [ArchiveMember], name: &str) -> Option<&'a ArchiveMember> {
    members.iter().find(|m| m.name == name)
}

/// The configuration member, by convention named `config`.
pub fn find_config(members: &[ArchiveMember]) -> Option<&ArchiveMember> {
    find(members, "config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let members = vec![
            ArchiveMember::new("config", b"s :: Source; s -> Discard;\n".to_vec()),
            ArchiveMember::new("elementmap.xml", b"<map/>".to_vec()),
        ];
        let bytes = unparse(&members);
        assert!(bytes.starts_with(MAGIC));
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, members);
        assert_eq!(find_config(&parsed).unwrap().data, members[0].data);
    }

    #[test]
    fn long_names_go_through_the_table() {
        let members = vec![ArchiveMember::new(
            "a-rather-long-package-name.uo",
            b"pkg".to_vec(),
        )];
        let bytes = unparse(&members);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed[0].name, "a-rather-long-package-name.uo");
        assert_eq!(parsed[0].data, b"pkg");
    }

    #[test]
    fn odd_sized_members_are_padded() {
        let members = vec![
            ArchiveMember::new("a", b"odd".to_vec()),
            ArchiveMember::new("b", b"even".to_vec()),
        ];
        let parsed = parse(&unparse(&members)).unwrap();
        assert_eq!(parsed, members);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse(b"not an archive"), Err(ArchiveError::BadMagic));
        let mut bytes = unparse(&[ArchiveMember::new("a", b"data".to_vec())]);
        bytes.truncate(bytes.len() - 3);
        assert_eq!(parse(&bytes), Err(ArchiveError::Truncated));
    }

    #[test]
    fn metadata_survives() {
        let mut member = ArchiveMember::new("config", b"x".to_vec());
        member.date = 1_700_000_000;
        member.uid = 1000;
        member.gid = 100;
        member.mode = 0o755;
        let parsed = parse(&unparse(&[member.clone()])).unwrap();
        assert_eq!(parsed[0], member);
    }
}
