use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::Cursor;
use tempfile::NamedTempFile;
use xisfcodec::file::{self, SaveOptions};
use xisfcodec::header::XmlElement;
use xisfcodec::io_stream::prepare_image;
use xisfcodec::preamble::{DEFAULT_ATTACHMENT_BUDGET, PADDING_BLOCK_SIZE, PREAMBLE_SIZE};
use xisfcodec::{
    ChecksumType, CompressionType, Geometry, Header, ImageMetaData, LoadWarning, Location,
    PixelData, XisfError, XisfReader, XisfWriter,
};

fn noise_u16(n: usize, seed: u64) -> Vec<u16> {
    let mut state = seed | 1;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as u16
        })
        .collect()
}

fn gradient(width: u32, height: u32) -> Vec<u16> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x / 4 + y / 4) * 100) as u16))
        .collect()
}

fn write_file(header: &Header, block: Option<&xisfcodec::DataBlock>) -> Vec<u8> {
    let mut writer = XisfWriter::new(Cursor::new(Vec::new()));
    writer.write(header, block).unwrap();
    writer.into_inner().into_inner()
}

#[test]
fn test_plain_roundtrip_is_bit_exact() {
    for (w, h) in [(1u32, 1u32), (16, 16), (37, 41)] {
        let temp = NamedTempFile::new().unwrap();
        let pixels = noise_u16((w * h) as usize, (w * 31 + h) as u64);

        file::save_image(
            temp.path(),
            w,
            h,
            &PixelData::UInt16(pixels.clone()),
            &ImageMetaData::default(),
            &SaveOptions::default(),
        )
        .unwrap();

        let loaded = file::load(temp.path(), false).unwrap();
        assert_eq!(loaded.pixels.width, w);
        assert_eq!(loaded.pixels.height, h);
        assert_eq!(loaded.pixels.data, pixels, "{w}x{h} did not round-trip");
        assert!(loaded.warnings.is_empty());
    }
}

#[test]
fn test_every_codec_and_checksum_roundtrips() {
    let (w, h) = (64u32, 48u32);
    let pixels = gradient(w, h);
    let checksums = [
        ChecksumType::None,
        ChecksumType::Sha1,
        ChecksumType::Sha256,
        ChecksumType::Sha512,
        ChecksumType::Sha3_256,
        ChecksumType::Sha3_512,
    ];
    for compression in [CompressionType::Lz4, CompressionType::Lz4Hc, CompressionType::Zlib] {
        for shuffle in [false, true] {
            for checksum in checksums {
                let opts = SaveOptions {
                    compression,
                    byte_shuffling: shuffle,
                    checksum,
                    ..SaveOptions::default()
                };
                let temp = NamedTempFile::new().unwrap();
                let block = file::save_image(
                    temp.path(),
                    w,
                    h,
                    &PixelData::UInt16(pixels.clone()),
                    &ImageMetaData::default(),
                    &opts,
                )
                .unwrap();
                assert_ne!(block.codec_name(), "none");
                assert_eq!(block.checksum_name(), checksum.name());

                let header = file::read_header(temp.path()).unwrap();
                let image = header.image().unwrap();
                assert!(image.attr("compression").is_some());
                assert_eq!(image.attr("checksum").is_some(), checksum != ChecksumType::None);

                let loaded = file::load(temp.path(), true).unwrap();
                assert!(loaded.is_bayered);
                assert!(loaded.warnings.is_empty(), "{compression}/{shuffle}/{checksum}: {:?}", loaded.warnings);
                assert_eq!(loaded.pixels.data, pixels);
            }
        }
    }
}

#[test]
fn test_incompressible_data_falls_back_to_uncompressed() {
    let pixels = noise_u16(4096, 0xDEAD_BEEF);
    let data = PixelData::UInt16(pixels.clone());
    for compression in [CompressionType::Lz4, CompressionType::Lz4Hc, CompressionType::Zlib] {
        let opts = SaveOptions {
            compression,
            byte_shuffling: true,
            checksum: ChecksumType::Sha256,
            ..SaveOptions::default()
        };
        let (header, block) =
            prepare_image(Geometry::new(64, 64), &data, &ImageMetaData::default(), &opts).unwrap();

        assert_eq!(block.codec_name(), "none");
        assert!(block.compression().is_none());
        assert_eq!(block.bytes(), data.to_le_bytes().as_slice());
        assert!(block.checksum().unwrap().verify(&data.to_le_bytes()));
        assert!(header.compression().unwrap().is_none());

        let file = write_file(&header, Some(&block));
        let loaded = XisfReader::new(Cursor::new(file)).unwrap().read_image(false).unwrap();
        assert_eq!(loaded.pixels.data, pixels);
        assert!(loaded.warnings.is_empty());
    }
}

#[test]
fn test_corrupted_block_loads_with_checksum_warning() {
    let pixels = gradient(32, 32);
    let opts = SaveOptions { checksum: ChecksumType::Sha256, ..SaveOptions::default() };
    let (header, block) = prepare_image(
        Geometry::new(32, 32),
        &PixelData::UInt16(pixels.clone()),
        &ImageMetaData::default(),
        &opts,
    )
    .unwrap();
    let mut file = write_file(&header, Some(&block));

    let Some(Location::Attachment { offset, .. }) = header.location().unwrap() else {
        panic!("expected an attachment");
    };
    file[offset as usize] ^= 0x01;

    let loaded = XisfReader::new(Cursor::new(file)).unwrap().read_image(false).unwrap();
    assert!(matches!(
        loaded.warnings.as_slice(),
        [LoadWarning::ChecksumMismatch { kind: ChecksumType::Sha256, .. }]
    ));
    assert_eq!(loaded.pixels.data[0], pixels[0] ^ 0x01);
    assert_eq!(&loaded.pixels.data[1..], &pixels[1..]);
}

#[test]
fn test_signature_rejection() {
    let temp = NamedTempFile::new().unwrap();
    let mut bytes = b"SIMPLE  =                    T".to_vec();
    bytes.resize(2880, b' ');
    std::fs::write(temp.path(), &bytes).unwrap();

    assert!(matches!(file::load(temp.path(), false), Err(XisfError::InvalidFormat(_))));
}

#[test]
fn test_data_block_is_block_aligned_after_zero_padding() {
    let mut meta = ImageMetaData {
        object_name: Some("IC 1396".into()),
        exposure_time: Some(300.0),
        ..Default::default()
    };
    for i in 0..40 {
        meta.keywords.push(xisfcodec::metadata::FitsKeyword::new(
            &format!("HIERARCH{i}"),
            format!("{i}"),
            "padding test",
        ));
    }
    for (w, h) in [(1u32, 1u32), (16, 16), (37, 41)] {
        let pixels = gradient(w, h);
        let opts = SaveOptions {
            compression: CompressionType::Zlib,
            checksum: ChecksumType::Sha3_512,
            byte_shuffling: true,
            ..SaveOptions::default()
        };
        let (header, block) =
            prepare_image(Geometry::new(w, h), &PixelData::UInt16(pixels), &meta, &opts).unwrap();
        let file = write_file(&header, Some(&block));

        let header_len = u32::from_le_bytes(file[8..12].try_into().unwrap()) as usize;
        let header_end = PREAMBLE_SIZE + header_len;
        let Some(Location::Attachment { offset, length }) = header.location().unwrap() else {
            panic!("expected an attachment");
        };
        let offset = offset as usize;

        assert_eq!(&file[12..16], &[0, 0, 0, 0]);
        assert_eq!(offset as u64 % PADDING_BLOCK_SIZE, 0);
        assert!((offset as u64) < (header_end + DEFAULT_ATTACHMENT_BUDGET) as u64 + PADDING_BLOCK_SIZE);
        assert!(file[header_end..offset].iter().all(|&b| b == 0));
        assert_eq!(length, block.stored_size());
        assert_eq!(&file[offset..], block.bytes());
    }
}

#[test]
fn test_inline_and_embedded_data() {
    let pixels: Vec<u16> = vec![1, 2, 300, 65535];
    let encoded = STANDARD.encode(PixelData::UInt16(pixels.clone()).to_le_bytes());

    // location="inline:base64": data is the Image element's text.
    let mut header = Header::new();
    header.add_image(Geometry::new(2, 2), xisfcodec::SampleFormat::UInt16, &ImageMetaData::default());
    {
        let image = header.image_mut().unwrap();
        image.set_attr("location", "inline:base64");
        image.text = encoded.clone();
    }
    let loaded = XisfReader::new(Cursor::new(write_file(&header, None)))
        .unwrap()
        .read_image(false)
        .unwrap();
    assert_eq!(loaded.pixels.data, pixels);

    // No location: data is a base64 <Data> child, wrapped across lines.
    let mut header = Header::new();
    header.add_image(Geometry::new(2, 2), xisfcodec::SampleFormat::UInt16, &ImageMetaData::default());
    let wrapped = format!("\n{}\n{}\n", &encoded[..4], &encoded[4..]);
    header
        .image_mut()
        .unwrap()
        .children
        .push(XmlElement::new("Data").with_attr("encoding", "base64").with_text(wrapped));
    let loaded = XisfReader::new(Cursor::new(write_file(&header, None)))
        .unwrap()
        .read_image(false)
        .unwrap();
    assert_eq!(loaded.pixels.data, pixels);
}

#[test]
fn test_unsupported_header_values_are_rejected() {
    let data = PixelData::UInt16(vec![0; 16]);
    let cases: [(&str, &str, fn(&XisfError) -> bool); 4] = [
        ("sampleFormat", "Complex64", |e| matches!(e, XisfError::UnsupportedSampleFormat(_))),
        ("compression", "zstd:32", |e| matches!(e, XisfError::UnsupportedCompression(_))),
        ("checksum", "md5:00", |e| matches!(e, XisfError::UnsupportedChecksum(_))),
        ("geometry", "abc:def", |e| matches!(e, XisfError::InvalidGeometry(_))),
    ];
    for (attr, value, is_expected) in cases {
        let (mut header, block) =
            prepare_image(Geometry::new(4, 4), &data, &ImageMetaData::default(), &SaveOptions::default())
                .unwrap();
        header.image_mut().unwrap().set_attr(attr, value);
        let file = write_file(&header, Some(&block));
        let err = XisfReader::new(Cursor::new(file)).unwrap().read_image(false).unwrap_err();
        assert!(is_expected(&err), "{attr}={value} gave {err:?}");
    }
}

#[test]
fn test_unparseable_header_is_invalid_format() {
    let xml = b"<xisf version=\"1.0\"><Image geometry=\"1:1\">";
    let mut file = b"XISF0100".to_vec();
    file.extend_from_slice(&(xml.len() as u32).to_le_bytes());
    file.extend_from_slice(&[0; 4]);
    file.extend_from_slice(xml);
    assert!(matches!(XisfReader::new(Cursor::new(file)), Err(XisfError::InvalidFormat(_))));
}

#[test]
fn test_truncated_attachment_is_invalid_format() {
    let (header, block) = prepare_image(
        Geometry::new(8, 8),
        &PixelData::UInt16(vec![7; 64]),
        &ImageMetaData::default(),
        &SaveOptions::default(),
    )
    .unwrap();
    let mut file = write_file(&header, Some(&block));
    file.truncate(file.len() - 10);
    let err = XisfReader::new(Cursor::new(file)).unwrap().read_image(false).unwrap_err();
    assert!(matches!(err, XisfError::InvalidFormat(_)));
}

#[test]
fn test_bad_metadata_does_not_abort_load() {
    let (mut header, block) = prepare_image(
        Geometry::new(2, 1),
        &PixelData::UInt16(vec![10, 20]),
        &ImageMetaData::default(),
        &SaveOptions::default(),
    )
    .unwrap();
    header.image_mut().unwrap().children.push(
        XmlElement::new("FITSKeyword")
            .with_attr("name", "EXPTIME")
            .with_attr("value", "'long'"),
    );
    let loaded = XisfReader::new(Cursor::new(write_file(&header, Some(&block))))
        .unwrap()
        .read_image(false)
        .unwrap();
    assert_eq!(loaded.pixels.data, vec![10, 20]);
    assert_eq!(loaded.metadata, ImageMetaData::default());
    assert!(matches!(loaded.warnings.as_slice(), [LoadWarning::MetadataUnavailable(_)]));
}

#[test]
fn test_other_sample_formats_are_normalized() {
    let cases = [
        (PixelData::UInt8(vec![0, 255, 1, 128]), vec![0u16, 65535, 257, 32896]),
        (PixelData::Float32(vec![0.0, 1.0, 0.5, 0.25]), vec![0, 65535, 32767, 16383]),
        (PixelData::Float64(vec![1.0, 0.0, 0.5, 0.75]), vec![65535, 0, 32767, 49151]),
        (PixelData::UInt32(vec![0, 1 << 30, u32::MAX, 0]), vec![0, 32767, 65535, 0]),
        (PixelData::UInt64(vec![0, 1 << 62, 0, 0]), vec![0, 32767, 0, 0]),
    ];
    for (data, expected) in cases {
        let opts = SaveOptions {
            compression: CompressionType::Lz4,
            byte_shuffling: true,
            ..SaveOptions::default()
        };
        let format = data.sample_format();
        let (header, block) =
            prepare_image(Geometry::new(2, 2), &data, &ImageMetaData::default(), &opts).unwrap();
        let loaded = XisfReader::new(Cursor::new(write_file(&header, Some(&block))))
            .unwrap()
            .read_image(false)
            .unwrap();
        assert_eq!(loaded.source_format, format);
        assert_eq!(loaded.pixels.data, expected, "{format}");
    }
}

#[test]
fn test_metadata_survives_save_and_load() {
    let temp = NamedTempFile::new().unwrap();
    let meta = ImageMetaData {
        object_name: Some("Sh2-155".into()),
        exposure_time: Some(180.0),
        filter: Some("Ha".into()),
        gain: Some(139),
        bayer_pattern: Some("RGGB".into()),
        ..Default::default()
    };
    file::save_image(
        temp.path(),
        4,
        4,
        &PixelData::UInt16(vec![1; 16]),
        &meta,
        &SaveOptions::default(),
    )
    .unwrap();
    let loaded = file::load(temp.path(), true).unwrap();
    assert_eq!(loaded.metadata.object_name.as_deref(), Some("Sh2-155"));
    assert_eq!(loaded.metadata.exposure_time, Some(180.0));
    assert_eq!(loaded.metadata.filter.as_deref(), Some("Ha"));
    assert_eq!(loaded.metadata.gain, Some(139));
    assert_eq!(loaded.metadata.bayer_pattern.as_deref(), Some("RGGB"));
}

#[test]
fn test_sample_count_must_match_geometry() {
    let err = prepare_image(
        Geometry::new(4, 4),
        &PixelData::UInt16(vec![0; 15]),
        &ImageMetaData::default(),
        &SaveOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, XisfError::InvalidState(_)));
}

mod properties {
    use proptest::prelude::*;
    use std::io::Cursor;
    use xisfcodec::file::SaveOptions;
    use xisfcodec::io_stream::prepare_image;
    use xisfcodec::shuffle::{shuffle, unshuffle};
    use xisfcodec::{get_codec, CompressionType, Geometry, ImageMetaData, PixelData, XisfReader, XisfWriter};

    fn codec_strategy() -> impl Strategy<Value = CompressionType> {
        prop_oneof![
            Just(CompressionType::None),
            Just(CompressionType::Lz4),
            Just(CompressionType::Lz4Hc),
            Just(CompressionType::Zlib),
        ]
    }

    proptest! {
        #[test]
        fn shuffle_is_inverted_by_unshuffle(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            k in prop_oneof![Just(1usize), Just(2), Just(4), Just(8)],
        ) {
            let shuffled = shuffle(&data, k);
            prop_assert_eq!(shuffled.len(), data.len());
            prop_assert_eq!(unshuffle(&shuffled, k), data);
        }

        #[test]
        fn codecs_restore_input(
            data in proptest::collection::vec(0u8..8, 1..2048),
            kind in codec_strategy(),
        ) {
            let codec = get_codec(kind);
            let packed = codec.compress(&data, 6).unwrap();
            let unpacked = codec.decompress(&packed, data.len()).unwrap();
            prop_assert_eq!(unpacked, data);
        }

        #[test]
        fn saved_images_load_bit_exact(
            w in 1u32..24,
            h in 1u32..24,
            seed in any::<u16>(),
            kind in codec_strategy(),
            shuffled in any::<bool>(),
        ) {
            let pixels: Vec<u16> = (0..w * h).map(|i| (i as u16).wrapping_mul(seed) >> 4).collect();
            let opts = SaveOptions { compression: kind, byte_shuffling: shuffled, ..SaveOptions::default() };
            let (header, block) = prepare_image(
                Geometry::new(w, h),
                &PixelData::UInt16(pixels.clone()),
                &ImageMetaData::default(),
                &opts,
            ).unwrap();

            let mut writer = XisfWriter::new(Cursor::new(Vec::new()));
            writer.write(&header, Some(&block)).unwrap();
            let file = writer.into_inner().into_inner();

            let loaded = XisfReader::new(Cursor::new(file)).unwrap().read_image(false).unwrap();
            prop_assert_eq!(loaded.pixels.data, pixels);
            prop_assert!(loaded.warnings.is_empty());
        }
    }
}
