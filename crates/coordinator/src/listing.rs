//! Decoding of `GC_LISTING` and `GC_NEWGRF_LOOKUP` payloads.
//!
//! Server records carry an `infoVersion` byte and a descending cascade of
//! version-gated field blocks; newer gates are read first. Decoding is
//! best-effort at the packet level: a malformed record ends the current
//! packet but already-decoded records survive.

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Landscape, NewGrfEntry, NewGrfLookup, ServerRecord};
use crate::wire::PayloadReader;

/// NewGRF entries as `grfId + md5`.
const NEWGRF_ENCODING_RAW: u8 = 0;
/// NewGRF entries as `grfId + md5 + name`.
const NEWGRF_ENCODING_NAMED: u8 = 1;
/// NewGRF entries as indices into the shared lookup table.
const NEWGRF_ENCODING_LOOKUP: u8 = 2;

/// Result of decoding one `GC_LISTING` payload.
#[derive(Debug)]
pub struct ListingBatch {
    pub servers: Vec<ServerRecord>,
    /// An empty listing is the coordinator's end-of-stream marker.
    pub end_of_stream: bool,
}

/// Decode a `GC_LISTING` payload.
///
/// A record that would read past the payload terminates this packet's
/// decode; whatever was decoded before it is kept.
pub fn decode_listing(payload: &[u8], lookup: &NewGrfLookup) -> ListingBatch {
    let mut reader = PayloadReader::new(payload);
    let count = match reader.read_u16_le() {
        Ok(count) => count,
        Err(e) => {
            debug!("malformed listing header: {e}");
            return ListingBatch {
                servers: Vec::new(),
                end_of_stream: false,
            };
        }
    };
    if count == 0 {
        return ListingBatch {
            servers: Vec::new(),
            end_of_stream: true,
        };
    }

    let mut servers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match decode_server(&mut reader, lookup) {
            Ok(server) => servers.push(server),
            Err(e) => {
                debug!("malformed server record, keeping {} decoded: {e}", servers.len());
                break;
            }
        }
    }
    ListingBatch {
        servers,
        end_of_stream: false,
    }
}

fn decode_server(reader: &mut PayloadReader<'_>, lookup: &NewGrfLookup) -> Result<ServerRecord> {
    let connection_string = reader.read_zstring()?;
    let info_version = reader.read_u8()?;
    let mut record = ServerRecord {
        connection_string,
        info_version,
        ..Default::default()
    };

    let mut newgrf_encoding = NEWGRF_ENCODING_RAW;
    if info_version >= 7 {
        record.ticks_playing = Some(reader.read_u64_le()?);
    }
    if info_version >= 6 {
        newgrf_encoding = reader.read_u8()?;
    }
    if info_version >= 5 {
        record.gamescript_version = Some(reader.read_i32_le()?);
        record.gamescript_name = Some(reader.read_zstring()?);
    }
    if info_version >= 4 {
        let grf_count = reader.read_u8()?;
        for _ in 0..grf_count {
            decode_newgrf(reader, newgrf_encoding, lookup, &mut record.newgrfs)?;
        }
    }
    if info_version >= 3 {
        record.calendar_date = Some(reader.read_i32_le()?);
        record.calendar_start = Some(reader.read_i32_le()?);
    }
    if info_version >= 2 {
        record.companies_max = reader.read_u8()?;
        record.companies_on = reader.read_u8()?;
        record.spectators_max = reader.read_u8()?;
    }
    record.name = reader.read_zstring()?;
    record.version = reader.read_zstring()?;
    if info_version <= 5 {
        let _language = reader.read_u8()?;
    }
    record.password = reader.read_u8()? != 0;
    record.clients_max = reader.read_u8()?;
    record.clients_on = reader.read_u8()?;
    record.spectators_on = reader.read_u8()?;
    if info_version <= 2 {
        let _legacy_dates: [u8; 4] = reader.read_array()?;
    }
    if info_version <= 5 {
        let _map_name = reader.read_zstring()?;
    }
    record.map_width = reader.read_u16_le()?;
    record.map_height = reader.read_u16_le()?;
    record.landscape = Landscape::from_u8(reader.read_u8()?);
    record.dedicated = reader.read_u8()? != 0;
    Ok(record)
}

fn decode_newgrf(
    reader: &mut PayloadReader<'_>,
    encoding: u8,
    lookup: &NewGrfLookup,
    out: &mut Vec<String>,
) -> Result<()> {
    match encoding {
        NEWGRF_ENCODING_RAW => {
            let grf_id = reader.read_u32_le()?;
            let _md5: [u8; 16] = reader.read_array()?;
            out.push(format!("{grf_id:08X}"));
        }
        NEWGRF_ENCODING_NAMED => {
            let _grf_id = reader.read_u32_le()?;
            let _md5: [u8; 16] = reader.read_array()?;
            out.push(reader.read_zstring()?);
        }
        NEWGRF_ENCODING_LOOKUP => {
            let index = reader.read_u32_le()?;
            match lookup.name(index) {
                Some(name) => out.push(name),
                // Lookup deltas can lag behind the listing; drop silently.
                None => debug!("NewGRF lookup index {index} unknown, dropping entry"),
            }
        }
        other => return Err(Error::UnknownNewGrfEncoding(other)),
    }
    Ok(())
}

/// Decode a `GC_NEWGRF_LOOKUP` payload into the shared table.
///
/// Returns the number of entries applied.
pub fn decode_newgrf_lookup(payload: &[u8], lookup: &NewGrfLookup) -> Result<u16> {
    let mut reader = PayloadReader::new(payload);
    // Table cursor; only meaningful to the coordinator's delta protocol.
    let _cursor = reader.read_u32_le()?;
    let count = reader.read_u16_le()?;
    for _ in 0..count {
        let index = reader.read_u32_le()?;
        let grf_id = reader.read_u32_le()?;
        let md5: [u8; 16] = reader.read_array()?;
        let name = reader.read_zstring()?;
        lookup.insert(index, NewGrfEntry { grf_id, md5, name });
    }
    Ok(count)
}
