use salmon_uci::{Board, MoveGenerator, START_FEN};

const FULL_PERFT_ENV: &str = "FULL_PERFT";
const NODE_LIMIT: u64 = 500_000;

const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

const CASES: &[(&str, &[u64])] = &[
    (START_FEN, &[20, 400, 8_902, 197_281, 4_865_609]),
    (KIWIPETE, &[48, 2_039, 97_862, 4_085_603]),
    ("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", &[14, 191, 2_812, 43_238, 674_624]),
    (
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        &[6, 264, 9_467, 422_333],
    ),
    (
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        &[44, 1_486, 62_379, 2_103_487],
    ),
];

#[test]
fn perft_reference_positions() {
    let full = std::env::var(FULL_PERFT_ENV).is_ok();
    let generator = MoveGenerator::new();

    for (fen, counts) in CASES {
        let mut board = Board::from_fen(fen).unwrap();
        let original = board.clone();

        for (depth, &expected) in (1u32..).zip(counts.iter()) {
            if !full && expected > NODE_LIMIT {
                break;
            }
            assert_eq!(
                generator.perft(&mut board, depth),
                expected,
                "perft({depth}) of {fen}"
            );
            assert_eq!(board, original, "perft left {fen} modified");
        }
    }
}

#[test]
fn divide_sums_to_perft() {
    let generator = MoveGenerator::new();
    let mut board = Board::from_fen(KIWIPETE).unwrap();

    let divide = generator.divide(&mut board, 2);
    assert_eq!(divide.len(), 48);
    assert_eq!(divide.iter().map(|(_, nodes)| nodes).sum::<u64>(), 2_039);

    let castle = divide
        .iter()
        .find(|(mv, _)| mv.to_string() == "e1g1")
        .expect("kiwipete allows kingside castling");
    assert_eq!(castle.1, 43);
}
