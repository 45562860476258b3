//! Placement commands keep matrix and context in agreement

use std::collections::BTreeSet;

use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
use stmap_engine::{ActionModel, EngineError, ElementRef, STMatrix};
use stmap_graph::{
    BiasType, ComputeBlock, ComputeOp, Precision, Shape, SplitModes, SplitVector, StorageKind,
    TaskGraph, TaskId,
};

fn core(x: usize, y: usize) -> MLCoord {
    MLCoord::from_levels(vec![[0, 0].into(), [x, y].into()])
}

/// Input -> n element-wise Soma ops in a chain
fn soma_chain(n: usize) -> (TaskGraph, TaskId, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let input = graph
        .add_storage(StorageKind::Input, Shape::vector(16), Precision::Int8)
        .unwrap();
    let mut prev = input;
    let mut ops = Vec::new();
    for _ in 0..n {
        let op = graph
            .add_compute(ComputeBlock::new(
                ComputeOp::Cvs { bit_shift: 1 },
                Shape::vector(16),
                Precision::Int8,
                BiasType::None,
            ))
            .unwrap();
        graph.connect_whole(prev, op, 0).unwrap();
        ops.push(op);
        prev = op;
    }
    (graph, input, ops)
}

fn placements(model: &ActionModel) -> Vec<(TaskId, MLCoord)> {
    model
        .context()
        .placements()
        .map(|(t, c)| (t, c.clone()))
        .collect()
}

#[test]
fn test_occupied_axon_slot_leaves_context_unchanged() {
    let mut graph = TaskGraph::new();
    let shape = Shape::vector(4).with(stmap_graph::Axis::R, 4);
    let first = graph
        .add_compute(ComputeBlock::new(ComputeOp::Cvm { bit_shift: 0 }, shape, Precision::Int8, BiasType::None))
        .unwrap();
    let second = graph
        .add_compute(ComputeBlock::new(ComputeOp::Cvm { bit_shift: 0 }, shape, Precision::Int8, BiasType::None))
        .unwrap();

    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(2, 2));
    let axon = core(1, 1).at_time(0, 2, PiIndex::Axon);
    model.put_in(&axon, first).unwrap();

    let before = model.context().clone();
    let err = model.put_in(&axon, second).unwrap_err();
    assert!(matches!(err, EngineError::Occupied { occupant, .. } if occupant == first));
    assert_eq!(model.context(), &before);
    assert!(model.coord_of(second).is_none());
    model.check_consistency().unwrap();
}

#[test]
fn test_merge_column_collects_every_resident() {
    let (graph, input, ops) = soma_chain(5);
    let hw = HardwareConfig::single_chip(4, 1);
    let mut model = ActionModel::new(graph, &hw);

    let columns = [core(0, 0), core(1, 0), core(2, 0), core(3, 0)];
    model.put_in(&core(1, 0).at_time(0, 0, PiIndex::Memory), input).unwrap();
    model.put_in(&core(1, 0).at_time(0, 0, PiIndex::Soma1), ops[0]).unwrap();
    model.put_in(&core(2, 0).at_time(0, 1, PiIndex::Soma1), ops[1]).unwrap();
    model.put_in(&core(2, 0).at_time(0, 1, PiIndex::Soma2), ops[2]).unwrap();
    model.put_in(&core(3, 0).at_time(0, 3, PiIndex::Soma2), ops[3]).unwrap();
    model.put_in(&core(0, 0).at_time(0, 2, PiIndex::Soma1), ops[4]).unwrap();

    let before: BTreeSet<TaskId> = model.context().placements().map(|(t, _)| t).collect();
    let moved = model.merge_column(&columns).unwrap();
    assert_eq!(moved, 5);

    let in_target: BTreeSet<TaskId> = model
        .matrix()
        .get_space(&core(0, 0))
        .unwrap()
        .unwrap()
        .into_iter()
        .flat_map(|(_, p)| p.tasks().map(|(_, t)| t).collect::<Vec<_>>())
        .collect();
    assert_eq!(in_target, before);
    for source in &columns[1..] {
        assert!(model.matrix().is_empty(source).unwrap());
    }
    assert_eq!(
        model.coord_of(ops[3]),
        Some(&core(0, 0).at_time(0, 3, PiIndex::Soma2)),
        "step, phase and unit are kept"
    );
    model.check_consistency().unwrap();
}

#[test]
fn test_merge_column_clash_reports_occupant() {
    let (graph, _, ops) = soma_chain(2);
    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(2, 1));
    model.put_in(&core(0, 0).at_time(0, 0, PiIndex::Soma1), ops[0]).unwrap();
    model.put_in(&core(1, 0).at_time(0, 0, PiIndex::Soma1), ops[1]).unwrap();
    let err = model.merge_column(&[core(0, 0), core(1, 0)]).unwrap_err();
    assert!(matches!(err, EngineError::Occupied { .. }));
    assert_eq!(
        model.coord_of(ops[1]),
        Some(&core(1, 0).at_time(0, 0, PiIndex::Soma1)),
        "clashing task stays in its source column"
    );
    assert_eq!(model.context().placed_count(), 2);
    model.check_consistency().unwrap();
}

#[test]
fn test_delete_column_returns_displaced() {
    let (graph, input, ops) = soma_chain(2);
    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(2, 1));
    let mem = core(1, 0).at_time(0, 1, PiIndex::Memory);
    let soma = core(1, 0).at_time(0, 1, PiIndex::Soma2);
    model.put_in(&mem, input).unwrap();
    model.put_in(&soma, ops[1]).unwrap();
    model.put_in(&core(0, 0).at_time(0, 0, PiIndex::Soma1), ops[0]).unwrap();

    let displaced = model.delete_column(&core(1, 0)).unwrap();
    assert_eq!(displaced, vec![(soma, ops[1]), (mem, input)]);
    assert!(model.matrix().get_space(&core(1, 0)).unwrap().is_none());
    assert_eq!(model.context().placed_count(), 1);
    assert!(matches!(
        model.delete_column(&core(1, 0)),
        Err(EngineError::NotFound { .. })
    ));
    model.check_consistency().unwrap();
}

#[test]
fn test_agreement_after_every_command() {
    let (graph, input, ops) = soma_chain(3);
    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(3, 3));
    let (a, b, c) = (ops[0], ops[1], ops[2]);

    let steps: Vec<Box<dyn Fn(&mut ActionModel) -> stmap_engine::Result<()>>> = vec![
        Box::new(move |m| m.put_in(&core(0, 0).at_time(0, 0, PiIndex::Memory), input)),
        Box::new(move |m| m.put_in(&core(0, 1).at_time(0, 1, PiIndex::Soma1), a)),
        Box::new(move |m| m.put_in(&core(2, 2).at_time(0, 3, PiIndex::Soma2), b)),
        Box::new(move |m| m.move_task(a, &core(1, 1).at_time(0, 1, PiIndex::Soma1))),
        Box::new(move |m| m.put_in(&core(1, 1).at_time(0, 1, PiIndex::Soma1), c)),
        Box::new(move |m| m.take_out(&core(2, 2).at_time(0, 3, PiIndex::Soma2), b)),
        Box::new(move |m| m.put_in(&core(1, 1).at_time(0, 1, PiIndex::Axon), c)),
        Box::new(move |m| m.put_in(&core(2, 2).at_time(0, 2, PiIndex::Soma2), c)),
        Box::new(|m| m.route_placed_edges().map(|_| ())),
    ];

    for (i, step) in steps.iter().enumerate() {
        let _ = step(&mut model);
        model
            .check_consistency()
            .unwrap_or_else(|e| panic!("after command {i}: {e}"));
        for (task, coord) in placements(&model) {
            let Some(ElementRef::Unit { point, pi }) = model.matrix().get_element(&coord).unwrap() else {
                panic!("{task} at {coord} does not resolve to a unit");
            };
            assert!(point.holds(pi, task));
        }
    }
    assert_eq!(model.context().placed_count(), 3);
    // only input -> a has both ends placed
    assert_eq!(model.context().routes().count(), 1);
}

#[test]
fn test_disabled_core_cannot_host() {
    let hw = HardwareConfig::single_chip(2, 1).with_disabled(core(1, 0));
    let matrix = STMatrix::from_config(&hw);
    let (graph, _, ops) = soma_chain(1);
    let mut model = ActionModel::with_matrix(graph, matrix);
    let err = model
        .put_in(&core(1, 0).at_time(0, 0, PiIndex::Soma1), ops[0])
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
    assert_eq!(model.context().placed_count(), 0);
}

#[test]
fn test_shallow_coordinate_is_contract_violation() {
    let (graph, input, _) = soma_chain(1);
    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(2, 2));
    let err = model.put_in(&core(0, 0), input).unwrap_err();
    assert!(matches!(err, EngineError::ContractViolation { .. }));
}

#[test]
fn test_split_group_concatenates_new_ids() {
    let (graph, input, ops) = soma_chain(2);
    let mut model = ActionModel::new(graph, &HardwareConfig::single_chip(2, 1));
    model.put_in(&core(0, 0).at_time(0, 0, PiIndex::Memory), input).unwrap();
    model.put_in(&core(0, 0).at_time(0, 0, PiIndex::Soma1), ops[0]).unwrap();
    model.put_in(&core(1, 0).at_time(0, 0, PiIndex::Soma2), ops[1]).unwrap();
    assert_eq!(model.route_placed_edges().unwrap(), 2);

    let new = model
        .split_group(&ops, SplitVector::new(1, 1, 2, 1), SplitModes::default())
        .unwrap();
    // first layer: two copies with their input copies, then the second layer's copies
    assert_eq!(new.len(), 6);
    let (first, second) = new.split_at(4);
    let graph = model.graph();
    for id in second {
        assert!(graph.block(*id).unwrap().is_compute());
        assert!(graph.producers(*id).iter().all(|p| first.contains(p)));
    }
    assert_eq!(first.iter().filter(|id| graph.block(**id).unwrap().is_compute()).count(), 2);
    graph.validate().unwrap();

    for id in [input, ops[0], ops[1]] {
        assert!(model.coord_of(id).is_none());
    }
    assert_eq!(model.context().placed_count(), 0);
    assert_eq!(model.context().routes().count(), 0);
    model.check_consistency().unwrap();
}
