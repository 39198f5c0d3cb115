use std::io::Cursor;

use fota_delta::{apply, inspect, Config, Error, Generator, Inputs, PatchHeader, PatchInfo, Summary, Token};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Image = Cursor<Vec<u8>>;

fn random(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0; len];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

/// `[crc][binary header][body]` with a valid CRC.
fn framed(binary_header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut rest = binary_header.to_vec();
    rest.extend_from_slice(body);
    let mut image = crc32fast::hash(&rest).to_le_bytes().to_vec();
    image.extend_from_slice(&rest);
    image
}

/// Compression header and section data for sections of the given lengths.
fn container(format: u16, block_size: u32, sections: &[usize]) -> Vec<u8> {
    let mut offsets = vec![0u32];
    for len in sections {
        offsets.push(offsets[offsets.len() - 1] + *len as u32);
    }
    let mut out = Vec::new();
    out.extend_from_slice(&((12 + 4 * offsets.len()) as u16).to_le_bytes());
    out.extend_from_slice(&format.to_le_bytes());
    out.extend_from_slice(&block_size.to_le_bytes());
    out.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
    for offset in &offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend(sections.iter().enumerate().flat_map(|(i, &len)| std::iter::repeat(i as u8).take(len)));
    out
}

fn generate(inputs: Inputs<Image>, config: &Config) -> (Vec<u8>, Summary) {
    let mut patch = Cursor::new(Vec::new());
    let mut seen = Vec::new();
    let generator = Generator::new(inputs, &mut patch, config).unwrap();
    let expected = generator.blocks();
    let summary = generator.run(|block| seen.push(block.block_number.get())).unwrap();
    assert_eq!(seen, (0..expected as u32).collect::<Vec<_>>());
    (patch.into_inner(), summary)
}

fn apply_to(old: &[u8], patch: &[u8], config: &Config) -> Result<(Vec<u8>, PatchInfo), Error> {
    let mut new = Vec::new();
    let info = apply(&mut Cursor::new(old), &mut new, &mut Cursor::new(patch), config)?;
    Ok((new, info))
}

fn small(block_size: usize) -> Config {
    Config {
        block_size,
        ..Config::default()
    }
}

fn tokens(info: &PatchInfo) -> Vec<Token> {
    info.blocks.iter().map(|block| block.token().unwrap()).collect()
}

#[test]
fn kernel_round_trip() {
    let old = random(20_000, 1);
    let mut new = old.clone();
    new[100..200].copy_from_slice(&random(100, 2));
    new.splice(9000..9000, b"a longer insertion in the middle".iter().copied());
    new[15_000] ^= 0xff;
    new.truncate(19_000);

    let config = Config::default();
    let (patch, summary) = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
    assert_eq!(summary.blocks_old, 5);
    assert_eq!(summary.blocks_new, 5);
    assert_eq!(summary.patch_len, patch.len() as u64);

    let (rebuilt, info) = apply_to(&old, &patch, &config).unwrap();
    assert_eq!(rebuilt, new);
    assert_eq!(info.header.crc_patchfile.get(), summary.crc);
    assert_eq!(info.header.blocksize_oldfile.get(), 4096);
    assert_eq!(info.header.blocksize_newfile.get(), 4096);
}

#[test]
fn scenario_single_byte_change() {
    let old = vec![0; 5000];
    let mut new = old.clone();
    new[2000] = 0xff;

    let config = Config::default();
    let (patch, _) = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
    let info = inspect(&mut &patch[..]).unwrap();
    assert_eq!(tokens(&info), [Token::Modify, Token::Skip]);
    assert_eq!(info.blocks[1].payload_len(), 0);
    assert_eq!(apply_to(&old, &patch, &config).unwrap().0, new);
}

#[test]
fn elf_round_trip() {
    let config = Config {
        block_size: 1024,
        ..Config::default()
    };
    let old_body = random(5000, 3);
    let mut new_body = old_body.clone();
    new_body[4000..4100].copy_from_slice(&[0x5a; 100]);
    new_body.extend_from_slice(&random(3000, 4));
    let old = framed(&[1; 32], &old_body);
    let new = framed(&[2; 32], &new_body);

    let (patch, summary) = generate(Inputs::elf(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
    assert_eq!((summary.blocks_old, summary.blocks_new), (5, 8));
    assert_eq!(summary.added, 3);
    assert_eq!(summary.removed, 0);

    let (rebuilt, info) = apply_to(&old, &patch, &config).unwrap();
    assert_eq!(rebuilt, new_body);
    assert_eq!(info.header.crc_newfile_size.get(), 4);
    assert_eq!(info.header.binary_header_size.get(), 32);
    assert_eq!(info.prefix.crc, Some(crc32fast::hash(&new[4..])));
    assert_eq!(info.prefix.binary_header, [2; 32]);
    assert_eq!(
        tokens(&info)[3..],
        [Token::Modify, Token::Modify, Token::Add, Token::Add, Token::Add]
    );
}

#[test]
fn compressed_round_trip() {
    let old_body = random(10_000, 5);
    let mut new_body = old_body.clone();
    new_body[2048..2100].copy_from_slice(&random(52, 6));
    new_body.truncate(6000);
    let old = framed(&[1; 32], &old_body);
    let new = framed(&[2; 32], &new_body);
    let sections = [700, 0, 512];
    let new_compressed = framed(&[3; 32], &container(7, 2048, &sections));

    let config = Config::default();
    let inputs = Inputs::compressed(
        Cursor::new(old.clone()),
        Cursor::new(new),
        Cursor::new(new_compressed.clone()),
    );
    let (patch, summary) = generate(inputs, &config);
    assert_eq!((summary.blocks_old, summary.blocks_new), (5, 3));
    assert_eq!(summary.removed, 2);

    let (rebuilt, info) = apply_to(&old, &patch, &config).unwrap();
    assert_eq!(rebuilt, new_body);

    let header = &info.header;
    assert_eq!(header.old_file_compression_format.get(), 7);
    assert_eq!(header.blocksize_newfile.get(), 2048);
    assert_eq!(header.blocksize_oldfile.get(), 2048);
    assert_eq!(header.comp_header_size.get(), 12 + 4 * 4);
    assert_eq!(info.prefix.crc, Some(crc32fast::hash(&new_compressed[4..])));
    assert_eq!(info.prefix.binary_header, [3; 32]);
    assert_eq!(
        &patch[PatchHeader::SIZE..PatchHeader::SIZE + header.prefix_len() as usize],
        &new_compressed[..header.prefix_len() as usize]
    );

    let compressed_sizes: Vec<_> = info.blocks[..3].iter().map(|b| b.new_block_size_c.get() as usize).collect();
    assert_eq!(compressed_sizes, sections);
    assert_eq!(
        tokens(&info),
        [Token::Skip, Token::Modify, Token::Modify, Token::Remove, Token::Remove]
    );
}

#[test]
fn compressed_section_table_must_match() {
    let old = framed(&[1; 32], &[0; 3000]);
    let new = framed(&[2; 32], &[0; 3000]);
    let new_compressed = framed(&[3; 32], &container(1, 1024, &[10, 10]));
    let inputs = Inputs::compressed(Cursor::new(old), Cursor::new(new), Cursor::new(new_compressed));
    let result = Generator::new(inputs, Cursor::new(Vec::new()), &Config::default());
    assert!(matches!(
        result,
        Err(Error::BlockCount {
            uncompressed: 3,
            compressed: 2,
            block_size: 1024
        })
    ));
}

#[test]
fn compressed_header_size_is_checked() {
    let mut table = container(1, 1024, &[10]);
    table[0] += 4;
    let old = framed(&[1; 32], &[0; 100]);
    let new = framed(&[2; 32], &[0; 100]);
    let inputs = Inputs::compressed(Cursor::new(old), Cursor::new(new), Cursor::new(framed(&[3; 32], &table)));
    let result = Generator::new(inputs, Cursor::new(Vec::new()), &Config::default());
    assert!(result.is_err());
}

#[test]
fn stale_input_crc_is_not_fatal() {
    let config = small(512);
    let mut old = framed(&[1; 32], &random(1000, 7));
    old[0] ^= 1;
    let new = framed(&[2; 32], &random(1000, 8));
    let (patch, _) = generate(Inputs::elf(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
    assert_eq!(apply_to(&old, &patch, &config).unwrap().0, &new[36..]);
}

#[test]
fn empty_images() {
    let config = small(64);
    let (patch, summary) = generate(Inputs::kernel(Cursor::new(Vec::new()), Cursor::new(Vec::new())), &config);
    assert_eq!(patch.len(), PatchHeader::SIZE);
    assert_eq!(summary, Summary { patch_len: 44, crc: summary.crc, ..Summary::default() });
    assert!(apply_to(&[], &patch, &config).unwrap().0.is_empty());

    let new = random(200, 9);
    let (patch, summary) = generate(Inputs::kernel(Cursor::new(Vec::new()), Cursor::new(new.clone())), &config);
    assert_eq!(summary.added, 4);
    assert_eq!(apply_to(&[], &patch, &config).unwrap().0, new);

    let (patch, summary) = generate(Inputs::kernel(Cursor::new(new.clone()), Cursor::new(Vec::new())), &config);
    assert_eq!(summary.removed, 4);
    assert!(apply_to(&new, &patch, &config).unwrap().0.is_empty());
}

#[test]
fn reused_output_buffer() {
    let old = vec![1; 300];
    let new = vec![2; 300];
    let config = small(128);
    let mut patch = Cursor::new(vec![0xaa; 10_000]);
    let inputs = Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone()));
    let summary = Generator::new(inputs, &mut patch, &config).unwrap().run(|_| {}).unwrap();

    let mut bytes = patch.into_inner();
    assert!(summary.patch_len < 10_000);
    bytes.truncate(summary.patch_len as usize);
    let fresh = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config).0;
    assert_eq!(bytes, fresh);
    assert_eq!(apply_to(&old, &bytes, &config).unwrap().0, new);
}

#[test]
fn generation_is_deterministic() {
    let old = random(3000, 10);
    let new = random(3000, 11);
    let config = small(1000);
    let first = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config).0;
    let second = generate(Inputs::kernel(Cursor::new(old), Cursor::new(new)), &config).0;
    assert_eq!(first, second);
}

fn arb_pair() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (proptest::collection::vec(any::<u8>(), 0..2048), any::<u64>()).prop_flat_map(|(old, seed)| {
        let edits = proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..16);
        let tail = proptest::collection::vec(any::<u8>(), 0..512);
        (Just(old), edits, tail, Just(seed)).prop_map(|(old, edits, tail, seed)| {
            let mut new = old.clone();
            if !new.is_empty() {
                for (index, byte) in edits {
                    let at = index.index(new.len());
                    new[at] = byte;
                }
            }
            if seed % 2 == 0 {
                new.extend_from_slice(&tail);
            } else {
                new.truncate(new.len().saturating_sub(tail.len()));
            }
            (old, new)
        })
    })
}

proptest! {
    #[test]
    fn prop_round_trip((old, new) in arb_pair(), block_size in 16usize..700) {
        let config = small(block_size);
        let (patch, summary) = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
        prop_assert_eq!(summary.blocks_old, (old.len() + block_size - 1) / block_size);
        prop_assert_eq!(summary.blocks_new, (new.len() + block_size - 1) / block_size);
        prop_assert!(summary.added == 0 || summary.removed == 0);

        let (rebuilt, info) = apply_to(&old, &patch, &config).unwrap();
        prop_assert_eq!(rebuilt, new);
        prop_assert_eq!(info.header.crc_patchfile.get(), crc32fast::hash(&patch[4..]));
        for (index, block) in info.blocks.iter().enumerate() {
            prop_assert_eq!(block.block_number.get() as usize, index);
        }
    }

    #[test]
    fn prop_unrelated_round_trip(
        old in proptest::collection::vec(any::<u8>(), 0..1500),
        new in proptest::collection::vec(any::<u8>(), 0..1500),
    ) {
        let config = small(256);
        let (patch, _) = generate(Inputs::kernel(Cursor::new(old.clone()), Cursor::new(new.clone())), &config);
        prop_assert_eq!(apply_to(&old, &patch, &config).unwrap().0, new);
    }
}
