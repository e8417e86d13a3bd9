use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tiletd::board::{Board, Direction};
use tiletd::evaluator::Evaluator;
use tiletd::pattern::{DEFAULT_FOUR_TUPLES, NTupleConfig};
use tiletd::search::{greedy_one_ply, greedy_two_ply, lookahead};

fn setup_evaluator() -> Evaluator {
    let positions: Vec<&[u8]> = DEFAULT_FOUR_TUPLES.iter().map(|cells| &cells[..]).collect();
    let mut evaluator = Evaluator::new(NTupleConfig::from_positions(16, &positions).unwrap());

    // Non-zero weights so the expectation is not a flat sum of zeros
    for rank in 1..8 {
        let mut ranks = [0u8; 16];
        ranks[0] = rank;
        ranks[5] = rank / 2;
        evaluator.apply_delta(&Board::from_ranks(ranks), rank as f32);
    }
    evaluator
}

/// Boards with a decreasing number of empty cells
fn boards_by_empty_cells() -> Vec<(usize, Board)> {
    [
        [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
        [3, 2, 1, 0, 4, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1],
        [7, 6, 5, 4, 2, 3, 1, 2, 1, 2, 1, 0, 0, 1, 0, 0],
        [9, 8, 7, 6, 2, 3, 4, 5, 1, 2, 1, 3, 2, 1, 0, 1],
    ]
    .into_iter()
    .map(|ranks| {
        let board = Board::from_ranks(ranks);
        (board.count_empty(), board)
    })
    .collect()
}

fn bench_lookahead(c: &mut Criterion) {
    let evaluator = setup_evaluator();
    let mut group = c.benchmark_group("lookahead");

    for (empty, board) in boards_by_empty_cells() {
        group.bench_with_input(BenchmarkId::new("empty", empty), &board, |b, board| {
            b.iter(|| black_box(lookahead(black_box(board), &evaluator)))
        });
    }

    group.finish();
}

fn bench_baselines(c: &mut Criterion) {
    let board = boards_by_empty_cells()[1].1;

    c.bench_function("greedy_one_ply", |b| {
        b.iter(|| black_box(greedy_one_ply(black_box(&board))))
    });
    c.bench_function("greedy_two_ply", |b| {
        b.iter(|| black_box(greedy_two_ply(black_box(&board))))
    });
    c.bench_function("slide_all_directions", |b| {
        b.iter(|| {
            for dir in Direction::ALL {
                black_box(black_box(&board).slided(dir));
            }
        })
    });
}

criterion_group!(benches, bench_lookahead, bench_baselines);
criterion_main!(benches);
