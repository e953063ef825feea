//! End-to-end Card and stat scenarios against the World.

use std::sync::Arc;

use sf_core::{
    CardError, CardSpec, Lifecycle, Modifier, OwnerId, Placement, RemoveMode, SlotableSpec,
    StatDefinition, StatTable, TagRegistry, World, WorldError,
};

fn registry() -> Arc<TagRegistry> {
    Arc::new(TagRegistry::new())
}

#[test]
fn capacity_three_card_aggregates_and_updates_on_removal() {
    let tags = registry();
    let gem = tags.register("Slotable.Gem").unwrap();
    let x = tags.register("Stat.X").unwrap();
    let mut world = World::new(Arc::clone(&tags), StatTable::default());
    let owner = OwnerId(1);
    let card = world.create_card(owner, CardSpec::fixed(3));

    let a = world
        .insert(
            card,
            SlotableSpec::new(gem).with_contribution(x, Modifier::Add(5)),
            Placement::Append,
        )
        .unwrap();
    world
        .insert(
            card,
            SlotableSpec::new(gem).with_contribution(x, Modifier::Add(3)),
            Placement::Append,
        )
        .unwrap();
    assert_eq!(world.aggregate(owner, x), 8);

    world.remove(a, RemoveMode::ClearSlot).unwrap();
    assert_eq!(world.aggregate(owner, x), 3);
    assert_eq!(world.card(card).map(|c| c.remaining_capacity()), Some(2));
}

#[test]
fn full_fixed_card_always_rejects_with_capacity_exceeded() {
    let tags = registry();
    let gem = tags.register("Slotable.Gem").unwrap();
    let mut world = World::new(tags, StatTable::default());

    for capacity in 1..=5 {
        let card = world.create_card(OwnerId(1), CardSpec::fixed(capacity));
        let ids: Vec<_> = (0..capacity)
            .map(|_| {
                world
                    .insert(card, SlotableSpec::new(gem), Placement::Append)
                    .unwrap()
            })
            .collect();
        let before = world.card(card).cloned();

        let err = world
            .insert(card, SlotableSpec::new(gem), Placement::Append)
            .unwrap_err();
        assert_eq!(
            err,
            WorldError::Card(CardError::CapacityExceeded { card, capacity })
        );
        assert_eq!(world.card(card).cloned(), before);
        for id in ids {
            assert_eq!(world.lifecycle(id), Some(Lifecycle::Active));
        }
    }
}

#[test]
fn card_queries_by_kind_follow_hierarchy() {
    let tags = registry();
    let sword = tags.register("Slotable.Weapon.Sword").unwrap();
    let bow = tags.register("Slotable.Weapon.Bow").unwrap();
    let gem = tags.register("Slotable.Gem").unwrap();
    let weapon = tags.lookup("Slotable.Weapon").unwrap();
    let mut world = World::new(Arc::clone(&tags), StatTable::default());
    let card = world.create_card(OwnerId(1), CardSpec::growable(8));

    for kind in [sword, gem, bow, sword] {
        world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();
    }
    let card = world.card(card).unwrap();

    assert_eq!(card.count_of_kind(weapon, &tags), 3);
    assert_eq!(card.count_of_kind(sword, &tags), 2);
    assert!(card.has_slotable_of_kind(gem, &tags));
    assert_eq!(card.remaining_capacity(), 4);
}

#[test]
fn layered_stats_combine_across_cards_of_one_owner() {
    let tags = registry();
    let rune = tags.register("Slotable.Rune").unwrap();
    let speed = tags.register("Stat.Speed").unwrap();
    let table = StatTable::default().with(speed, StatDefinition::layered().with_base(100));
    let mut world = World::new(tags, table);
    let owner = OwnerId(3);
    let left = world.create_card(owner, CardSpec::fixed(2));
    let right = world.create_card(owner, CardSpec::fixed(2));

    world
        .insert(
            left,
            SlotableSpec::new(rune).with_contribution(speed, Modifier::Increased(50)),
            Placement::Append,
        )
        .unwrap();
    let more = world
        .insert(
            right,
            SlotableSpec::new(rune).with_contribution(speed, Modifier::More(100)),
            Placement::Append,
        )
        .unwrap();
    assert_eq!(world.aggregate(owner, speed), 300);

    world.remove(more, RemoveMode::ClearSlot).unwrap();
    assert_eq!(world.aggregate(owner, speed), 150);

    // per-card views only see their own Slotables
    let table = world.stat_table();
    assert_eq!(world.card(left).map(|c| c.aggregate(speed, table)), Some(150));
    assert_eq!(world.card(right).map(|c| c.aggregate(speed, table)), Some(100));
}
