//! Fixed-layout identification and zone report encodings.
//!
//! All multi-byte fields are little-endian except the EUI-64, which is stored
//! big-endian as the identifier is defined byte-wise.
//!
//! # Identify Namespace (4096 bytes)
//!
//! | offset | width | field   |
//! |--------|-------|---------|
//! | 0      | 8     | NSZE    |
//! | 8      | 8     | NCAP    |
//! | 16     | 8     | NUSE    |
//! | 24     | 1     | NSFEAT  |
//! | 25     | 1     | NLBAF (zero-based) |
//! | 26     | 1     | FLBAS   |
//! | 27     | 1     | MC      |
//! | 28     | 1     | DPC     |
//! | 29     | 1     | DPS     |
//! | 30     | 1     | NMIC    |
//! | 33     | 1     | DLFEAT  |
//! | 68     | 2     | NPDG (zero-based) |
//! | 70     | 2     | NPDA (zero-based) |
//! | 74     | 2     | MSSRL   |
//! | 76     | 4     | MCL     |
//! | 80     | 1     | MSRC    |
//! | 104    | 16    | NGUID   |
//! | 120    | 8     | EUI64 (big-endian) |
//! | 128    | 4x16  | LBAF: MS u16, LBADS u8, RP u8 |
//!
//! # Identify Namespace, Zoned (4096 bytes)
//!
//! | offset | width | field |
//! |--------|-------|-------|
//! | 0      | 2     | ZOC   |
//! | 2      | 2     | OZCS  |
//! | 4      | 4     | MAR (zero-based, 0xffffffff = no limit) |
//! | 8      | 4     | MOR (zero-based, 0xffffffff = no limit) |
//! | 2816   | 16x16 | LBAFE: ZSZE u64, ZDES u8, 7 reserved |
//!
//! # Zone Descriptor (64 bytes)
//!
//! | offset | width | field |
//! |--------|-------|-------|
//! | 0      | 1     | ZT    |
//! | 1      | 1     | ZS (state << 4) |
//! | 2      | 1     | ZA    |
//! | 8      | 8     | ZCAP  |
//! | 16     | 8     | ZSLBA |
//! | 24     | 8     | WP    |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::geometry::{LbaFormat, NamespaceGeometry, ZoneGeometry, MAX_LBA_FORMATS};
use super::params::NamespaceParams;
use crate::zns::{Zone, ZoneAttrs, ZoneState, ZoneType};

/// Size of an identify data structure.
pub const IDENTIFY_SIZE: usize = 4096;

/// Size of a zone descriptor.
pub const ZONE_DESCRIPTOR_SIZE: usize = 64;

/// Size of the zone report header.
pub const ZONE_REPORT_HEADER_SIZE: usize = 64;

/// NSFEAT: deallocated or unwritten logical block error support
pub const NSFEAT_DULBE: u8 = 0x04;
/// NSFEAT: optimal performance fields supported
pub const NSFEAT_OPTPERF: u8 = 0x10;
/// FLBAS: metadata transferred at the end of the data LBA
pub const FLBAS_EXTENDED: u8 = 0x10;
/// MC: extended and separate metadata buffers supported
pub const MC_EXTENDED_SEPARATE: u8 = 0x03;
/// DPC: every protection type and location supported
pub const DPC_ALL: u8 = 0x1f;
/// DPS: protection information in the first eight bytes of metadata
pub const DPS_FIRST_EIGHT: u8 = 0x08;
/// NMIC: namespace may be attached to several controllers
pub const NMIC_SHARED: u8 = 0x01;
/// DLFEAT: deallocated blocks read as zeroes
pub const DLFEAT_ZEROES: u8 = 0x01;
/// OZCS: read across zone boundaries supported
pub const OZCS_CROSS_READ: u16 = 0x01;

const LBAFE_OFFSET: usize = 2816;

// =============================================================================
// Identify Namespace
// =============================================================================

/// Identify Namespace fields computed by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdNs {
    pub nsze: u64,
    pub ncap: u64,
    pub nuse: u64,
    pub nsfeat: u8,
    pub flbas: u8,
    pub mc: u8,
    pub dpc: u8,
    pub dps: u8,
    pub nmic: u8,
    pub dlfeat: u8,
    pub npdg: u16,
    pub npda: u16,
    pub mssrl: u16,
    pub mcl: u32,
    pub msrc: u8,
    pub nguid: [u8; 16],
    pub eui64: u64,
    pub lbaf: Vec<LbaFormat>,
}

impl IdNs {
    /// Identify data for a namespace with `geometry`. The NGUID carries the
    /// namespace UUID.
    pub fn new(
        geometry: &NamespaceGeometry,
        params: &NamespaceParams,
        uuid: &Uuid,
        eui64: u64,
    ) -> Self {
        let blocks = geometry.reported_blocks();
        let npdg = u16::try_from(geometry.dealloc_granularity - 1).unwrap_or(u16::MAX);

        let mut nsfeat = NSFEAT_OPTPERF;
        if geometry.dulbe {
            nsfeat |= NSFEAT_DULBE;
        }

        let mut flbas = geometry.format_index as u8 & 0xf;
        if params.mset {
            flbas |= FLBAS_EXTENDED;
        }

        let mut dps = params.pi;
        if params.pi != 0 && params.pil {
            dps |= DPS_FIRST_EIGHT;
        }

        Self {
            nsze: blocks,
            ncap: blocks,
            nuse: blocks,
            nsfeat,
            flbas,
            mc: MC_EXTENDED_SEPARATE,
            dpc: DPC_ALL,
            dps,
            nmic: if params.shared { NMIC_SHARED } else { 0 },
            dlfeat: DLFEAT_ZEROES,
            npdg,
            npda: npdg,
            mssrl: params.mssrl,
            mcl: params.mcl,
            msrc: params.msrc,
            nguid: *uuid.as_bytes(),
            eui64,
            lbaf: geometry.formats.formats().to_vec(),
        }
    }

    /// Zero-based number of LBA formats.
    pub fn nlbaf(&self) -> u8 {
        self.lbaf.len().saturating_sub(1) as u8
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IDENTIFY_SIZE);
        buf.put_u64_le(self.nsze);
        buf.put_u64_le(self.ncap);
        buf.put_u64_le(self.nuse);
        buf.put_u8(self.nsfeat);
        buf.put_u8(self.nlbaf());
        buf.put_u8(self.flbas);
        buf.put_u8(self.mc);
        buf.put_u8(self.dpc);
        buf.put_u8(self.dps);
        buf.put_u8(self.nmic);
        buf.put_bytes(0, 2); // rescap, fpi
        buf.put_u8(self.dlfeat);
        buf.put_bytes(0, 68 - 34);
        buf.put_u16_le(self.npdg);
        buf.put_u16_le(self.npda);
        buf.put_u16_le(0); // nows
        buf.put_u16_le(self.mssrl);
        buf.put_u32_le(self.mcl);
        buf.put_u8(self.msrc);
        buf.put_bytes(0, 104 - 81);
        buf.put_slice(&self.nguid);
        buf.put_u64(self.eui64);
        for i in 0..MAX_LBA_FORMATS {
            let f = self.lbaf.get(i).copied().unwrap_or(LbaFormat::new(0, 0));
            buf.put_u16_le(f.ms);
            buf.put_u8(f.ds);
            buf.put_u8(0); // rp
        }
        buf.put_bytes(0, IDENTIFY_SIZE - buf.len());
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < IDENTIFY_SIZE {
            return None;
        }
        let mut buf = data;
        let nsze = buf.get_u64_le();
        let ncap = buf.get_u64_le();
        let nuse = buf.get_u64_le();
        let nsfeat = buf.get_u8();
        let nlbaf = buf.get_u8() as usize;
        let flbas = buf.get_u8();
        let mc = buf.get_u8();
        let dpc = buf.get_u8();
        let dps = buf.get_u8();
        let nmic = buf.get_u8();
        buf.advance(2);
        let dlfeat = buf.get_u8();
        buf.advance(68 - 34);
        let npdg = buf.get_u16_le();
        let npda = buf.get_u16_le();
        buf.advance(2);
        let mssrl = buf.get_u16_le();
        let mcl = buf.get_u32_le();
        let msrc = buf.get_u8();
        buf.advance(104 - 81);
        let mut nguid = [0u8; 16];
        buf.copy_to_slice(&mut nguid);
        let eui64 = buf.get_u64();
        let lbaf = (0..=nlbaf.min(MAX_LBA_FORMATS - 1))
            .map(|_| {
                let ms = buf.get_u16_le();
                let ds = buf.get_u8();
                buf.advance(1);
                LbaFormat::new(ds, ms)
            })
            .collect();

        Some(Self {
            nsze,
            ncap,
            nuse,
            nsfeat,
            flbas,
            mc,
            dpc,
            dps,
            nmic,
            dlfeat,
            npdg,
            npda,
            mssrl,
            mcl,
            msrc,
            nguid,
            eui64,
            lbaf,
        })
    }
}

// =============================================================================
// Identify Namespace (Zoned)
// =============================================================================

/// Zoned command set specific identify data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdNsZoned {
    pub zoc: u16,
    pub ozcs: u16,
    pub mar: u32,
    pub mor: u32,

    /// (ZSZE, ZDES) per reported LBA format
    pub lbafe: Vec<(u64, u8)>,
}

impl IdNsZoned {
    /// Identify data for a zoned namespace reporting `nformats` LBA formats.
    pub fn new(zones: &ZoneGeometry, nformats: usize) -> Self {
        Self {
            zoc: 0,
            ozcs: if zones.cross_zone_read {
                OZCS_CROSS_READ
            } else {
                0
            },
            mar: zones.max_active.wrapping_sub(1),
            mor: zones.max_open.wrapping_sub(1),
            lbafe: vec![(zones.zone_size, zones.zdes()); nformats.min(MAX_LBA_FORMATS)],
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IDENTIFY_SIZE);
        buf.put_u16_le(self.zoc);
        buf.put_u16_le(self.ozcs);
        buf.put_u32_le(self.mar);
        buf.put_u32_le(self.mor);
        buf.put_bytes(0, LBAFE_OFFSET - buf.len());
        for i in 0..MAX_LBA_FORMATS {
            let (zsze, zdes) = self.lbafe.get(i).copied().unwrap_or_default();
            buf.put_u64_le(zsze);
            buf.put_u8(zdes);
            buf.put_bytes(0, 7);
        }
        buf.put_bytes(0, IDENTIFY_SIZE - buf.len());
        buf.freeze()
    }

    /// Decode, keeping the first `nformats` LBA format extensions.
    pub fn decode(data: &[u8], nformats: usize) -> Option<Self> {
        if data.len() < IDENTIFY_SIZE {
            return None;
        }
        let mut buf = data;
        let zoc = buf.get_u16_le();
        let ozcs = buf.get_u16_le();
        let mar = buf.get_u32_le();
        let mor = buf.get_u32_le();

        let mut lbafe_buf = &data[LBAFE_OFFSET..];
        let lbafe = (0..nformats.min(MAX_LBA_FORMATS))
            .map(|_| {
                let zsze = lbafe_buf.get_u64_le();
                let zdes = lbafe_buf.get_u8();
                lbafe_buf.advance(7);
                (zsze, zdes)
            })
            .collect();

        Some(Self {
            zoc,
            ozcs,
            mar,
            mor,
            lbafe,
        })
    }
}

// =============================================================================
// Namespace Identification Descriptors
// =============================================================================

const NIDT_EUI64: u8 = 0x1;
const NIDT_UUID: u8 = 0x3;
const NIDT_CSI: u8 = 0x4;

/// Command set identifier: NVM
pub const CSI_NVM: u8 = 0x0;
/// Command set identifier: Zoned
pub const CSI_ZONED: u8 = 0x2;

/// Namespace identification descriptor list (EUI-64 when set, UUID, CSI).
pub fn encode_ns_descriptors(eui64: u64, uuid: &Uuid, csi: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(IDENTIFY_SIZE);

    if eui64 != 0 {
        buf.put_u8(NIDT_EUI64);
        buf.put_u8(8);
        buf.put_u16(0);
        buf.put_u64(eui64);
    }

    buf.put_u8(NIDT_UUID);
    buf.put_u8(16);
    buf.put_u16(0);
    buf.put_slice(uuid.as_bytes());

    buf.put_u8(NIDT_CSI);
    buf.put_u8(1);
    buf.put_u16(0);
    buf.put_u8(csi);

    buf.put_bytes(0, IDENTIFY_SIZE - buf.len());
    buf.freeze()
}

// =============================================================================
// Zone Descriptors
// =============================================================================

/// Encode one zone descriptor.
pub fn encode_zone_descriptor(zone: &Zone, buf: &mut impl BufMut) {
    buf.put_u8(zone.zone_type as u8);
    buf.put_u8(zone.state.code() << 4);
    buf.put_u8(zone.attrs.bits());
    buf.put_bytes(0, 5);
    buf.put_u64_le(zone.capacity);
    buf.put_u64_le(zone.start);
    buf.put_u64_le(if zone.state.wp_is_valid() {
        zone.wp
    } else {
        u64::MAX
    });
    buf.put_bytes(0, 32);
}

/// Decode one zone descriptor. The shadow write pointer is not reported and
/// is set equal to the write pointer.
pub fn decode_zone_descriptor(mut buf: &[u8]) -> Option<Zone> {
    if buf.len() < ZONE_DESCRIPTOR_SIZE {
        return None;
    }
    let zt = buf.get_u8();
    let state = ZoneState::from_code(buf.get_u8() >> 4)?;
    let attrs = ZoneAttrs::from_bits(buf.get_u8());
    buf.advance(5);
    let capacity = buf.get_u64_le();
    let start = buf.get_u64_le();
    let wp = buf.get_u64_le();

    if zt != ZoneType::SeqWriteRequired as u8 {
        return None;
    }
    Some(Zone {
        start,
        capacity,
        wp,
        shadow_wp: wp,
        state,
        attrs,
        zone_type: ZoneType::SeqWriteRequired,
    })
}

/// Encode a zone report: a header holding the zone count, then one
/// descriptor per zone.
///
/// With a non-zero `ext_size` every descriptor is followed by `ext_size`
/// extension bytes: the given extension, or zeros when there is none.
pub fn encode_zone_report<'a>(
    zones: impl IntoIterator<Item = (&'a Zone, Option<&'a [u8]>)>,
    ext_size: usize,
) -> Bytes {
    let mut body = BytesMut::new();
    let mut count = 0u64;
    for (zone, ext) in zones {
        encode_zone_descriptor(zone, &mut body);
        if ext_size > 0 {
            match ext {
                Some(ext) if ext.len() == ext_size => body.put_slice(ext),
                _ => body.put_bytes(0, ext_size),
            }
        }
        count += 1;
    }

    let mut buf = BytesMut::with_capacity(ZONE_REPORT_HEADER_SIZE + body.len());
    buf.put_u64_le(count);
    buf.put_bytes(0, ZONE_REPORT_HEADER_SIZE - 8);
    buf.put(body);
    buf.freeze()
}
