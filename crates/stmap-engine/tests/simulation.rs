//! Split, place, route, then evaluate and schedule a convolution layer

use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
use stmap_engine::{ActionModel, CommEvaluator, MemoryEvaluator, PipelineExecutor, Scheduler};
use stmap_graph::{
    BiasType, ComputeBlock, ComputeOp, KernelWindow, Precision, Shape, SplitModes, SplitVector,
    StorageKind, TaskGraph, TaskId,
};

fn core(x: usize) -> MLCoord {
    MLCoord::from_levels(vec![[0, 0].into(), [x, 0].into()])
}

/// Input 6x6x3 -> Sic -> CC 3x3 (f=8, + Sw) -> Output 4x4x8
fn conv_graph() -> (TaskGraph, TaskId, TaskId, TaskId) {
    let mut graph = TaskGraph::new();
    let input = graph
        .add_storage(StorageKind::Input, Shape::yxf(6, 6, 3), Precision::Int8)
        .unwrap();
    let act = graph
        .add_storage(StorageKind::Sic, Shape::yxf(6, 6, 3), Precision::Int8)
        .unwrap();
    let weight = graph
        .add_storage(
            StorageKind::Sw,
            Shape {
                f: 8,
                r: 3,
                ky: 3,
                kx: 3,
                ..Shape::ZERO
            },
            Precision::Int8,
        )
        .unwrap();
    let conv = graph
        .add_compute(ComputeBlock::new(
            ComputeOp::Cc {
                window: KernelWindow::new(1, 0),
                bit_shift: 2,
            },
            Shape {
                y: 4,
                x: 4,
                f: 8,
                r: 3,
                ky: 3,
                kx: 3,
                iy: 6,
                ix: 6,
            },
            Precision::Int8,
            BiasType::None,
        ))
        .unwrap();
    let output = graph
        .add_storage(StorageKind::Output, Shape::yxf(4, 4, 8), Precision::Int8)
        .unwrap();
    graph.connect_whole(input, act, 0).unwrap();
    graph.connect_whole(act, conv, 0).unwrap();
    graph.connect_whole(weight, conv, 1).unwrap();
    graph.connect_whole(conv, output, 0).unwrap();
    graph.validate().unwrap();
    (graph, input, conv, output)
}

#[test]
fn test_split_layer_end_to_end() {
    let (graph, input, conv, output) = conv_graph();
    let hw = HardwareConfig::single_chip(2, 1);
    let mut model = ActionModel::new(graph, &hw);

    let new = model
        .split_task(conv, SplitVector::new(2, 1, 1, 1), SplitModes::default())
        .unwrap();
    model.graph().validate().unwrap();
    let copies: Vec<TaskId> = new
        .iter()
        .copied()
        .filter(|id| model.graph().block(*id).is_some_and(|b| b.is_compute()))
        .collect();
    assert_eq!(copies.len(), 2);

    for (x, copy) in copies.iter().enumerate() {
        model
            .put_group_in(&core(x).at_time(0, 0, PiIndex::Axon), *copy)
            .unwrap();
    }
    model.put_in(&core(0).at_time(0, 0, PiIndex::Memory), input).unwrap();
    model.put_in(&core(1).at_time(0, 1, PiIndex::Memory), output).unwrap();
    assert_eq!(model.context().placed_count(), model.graph().block_count());

    let routed = model.route_placed_edges().unwrap();
    assert_eq!(routed, model.graph().edge_count());
    model.check_consistency().unwrap();

    // Transfers
    let mut comm = CommEvaluator::from_placement(&model).unwrap();
    let done = comm.run_to_completion();
    assert_eq!(done.len(), routed);
    let last = done.iter().map(|(_, t)| *t).fold(0.0, f64::max);
    assert!(last > 0.0, "some edge crosses a link");
    for segment in comm.trace() {
        assert!(comm.load_at(&segment.hop, segment.from) <= segment.bandwidth + 1e-9);
    }

    // Memory
    let reports = MemoryEvaluator::new(model.graph(), model.matrix())
        .evaluate_occupied()
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.exceeds_capacity() && r.peak > 0));

    // Schedule
    let fired = Scheduler::new(&model, PipelineExecutor::new()).run().unwrap();
    assert_eq!(fired.len(), model.graph().block_count());
    assert_eq!(fired.first(), Some(&input));
    assert_eq!(fired.last(), Some(&output));
}

#[test]
fn test_split_after_placement_drops_stale_state() {
    let (graph, input, conv, output) = conv_graph();
    let hw = HardwareConfig::single_chip(2, 1);
    let mut model = ActionModel::new(graph, &hw);

    model.put_group_in(&core(0).at_time(0, 0, PiIndex::Axon), conv).unwrap();
    model.put_in(&core(1).at_time(0, 0, PiIndex::Memory), input).unwrap();
    model.put_in(&core(1).at_time(0, 2, PiIndex::Memory), output).unwrap();
    let routed = model.route_placed_edges().unwrap();
    assert_eq!(routed, 4);

    let new = model
        .split_task(conv, SplitVector::new(1, 1, 2, 1), SplitModes::default())
        .unwrap();
    assert!(!new.is_empty());
    assert_eq!(model.context().placed_count(), 2, "only input and output stay");
    assert_eq!(model.context().routes().count(), 0);
    model.check_consistency().unwrap();
}
