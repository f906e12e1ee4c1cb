//! Order commands.

use super::{format_timestamp, record_id, CliError, Context};
use posy_core::{Collection, LineItem, OrderRecord, OrderStatus};

/// Parses `catalog_id:quantity:unit_price`. The catalog id may itself
/// contain colons.
pub fn parse_line(arg: &str) -> Result<LineItem, Box<dyn std::error::Error>> {
    let invalid = || CliError::InvalidLine(arg.to_string());
    let (rest, unit_price) = arg.rsplit_once(':').ok_or_else(invalid)?;
    let (catalog_id, quantity) = rest.rsplit_once(':').ok_or_else(invalid)?;
    Ok(LineItem {
        catalog_id: record_id(catalog_id)?,
        quantity: quantity.parse().map_err(|_| invalid())?,
        unit_price: unit_price.parse().map_err(|_| invalid())?,
    })
}

/// Creates a draft order.
pub fn create(ctx: &Context, lines: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let items = lines
        .iter()
        .map(|l| parse_line(l))
        .collect::<Result<Vec<_>, _>>()?;
    let order = ctx.local.store().create_order(items)?;
    println!("✓ Created order {}", order.id);
    print_order(&order);
    Ok(())
}

/// Adds a line.
pub fn add(
    ctx: &Context,
    order: &str,
    catalog_id: &str,
    quantity: u32,
    unit_price: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let item = LineItem {
        catalog_id: record_id(catalog_id)?,
        quantity,
        unit_price,
    };
    let order = ctx.local.store().add_line_item(&record_id(order)?, item, None)?;
    print_order(&order);
    Ok(())
}

/// Sets a line's quantity.
pub fn set_quantity(
    ctx: &Context,
    order: &str,
    catalog_id: &str,
    quantity: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let order = ctx.local.store().set_line_quantity(
        &record_id(order)?,
        &record_id(catalog_id)?,
        quantity,
        None,
    )?;
    print_order(&order);
    Ok(())
}

/// Removes a line.
pub fn remove(ctx: &Context, order: &str, catalog_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let order = ctx
        .local
        .store()
        .remove_line_item(&record_id(order)?, &record_id(catalog_id)?, None)?;
    print_order(&order);
    Ok(())
}

/// Moves an order through its lifecycle.
pub fn status(ctx: &Context, order: &str, to: OrderStatus) -> Result<(), Box<dyn std::error::Error>> {
    let order = ctx
        .local
        .store()
        .transition_order(&record_id(order)?, to, None)?;
    println!("✓ Order {} is now {}", order.id, order.status);
    Ok(())
}

/// Shows one order.
pub fn show(ctx: &Context, order: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let order = ctx.local.store().get_order(&record_id(order)?)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&order)?),
        _ => print_order(&order),
    }
    Ok(())
}

/// Lists orders, oldest first.
pub fn list(ctx: &Context, status: Option<OrderStatus>) -> Result<(), Box<dyn std::error::Error>> {
    let mut orders: Vec<OrderRecord> = ctx
        .local
        .store()
        .list(Collection::Orders)
        .filter_map(|r| r.as_order().cloned())
        .filter(|o| status.map_or(true, |s| o.status == s))
        .collect();
    orders.sort_by_key(|o| o.created_at);

    println!("{} orders", orders.len());
    for order in &orders {
        println!(
            "  {}  {:<10} {:>3} lines  total {:>8}  {}",
            order.id,
            order.status.name(),
            order.line_items.len(),
            order.total(),
            format_timestamp(order.created_at)
        );
    }
    Ok(())
}

fn print_order(order: &OrderRecord) {
    println!("Order {}", order.id);
    println!("  Status: {}", order.status);
    println!("  Created: {}", format_timestamp(order.created_at));
    println!("  Version: {}", order.version);
    for line in &order.line_items {
        println!(
            "  {:<24} {:>4} x {:>8} = {:>9}",
            line.catalog_id,
            line.quantity,
            line.unit_price,
            line.total()
        );
    }
    println!("  Total: {}", order.total());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::RemoteArgs;

    #[test]
    fn lines_parse_from_the_right() {
        let line = parse_line("spring/large:2:1500").unwrap();
        assert_eq!(line.catalog_id.as_str(), "spring/large");
        assert_eq!((line.quantity, line.unit_price), (2, 1500));

        let line = parse_line("a:b:3:4").unwrap();
        assert_eq!(line.catalog_id.as_str(), "a:b");

        assert!(parse_line("spring:2").is_err());
        assert!(parse_line("spring:two:1500").is_err());
        assert!(parse_line("spring:2:-1").is_err());
    }

    #[test]
    fn order_lifecycle_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path(), RemoteArgs::default()).unwrap();
        create(&ctx, &["spring:2:1500".into()]).unwrap();

        let id = ctx
            .local
            .store()
            .list(Collection::Orders)
            .next()
            .unwrap()
            .id()
            .to_string();
        add(&ctx, &id, "spring", 1, 1500).unwrap();
        add(&ctx, &id, "rose-red", 12, 450).unwrap();
        set_quantity(&ctx, &id, "rose-red", 6).unwrap();
        remove(&ctx, &id, "rose-red").unwrap();
        status(&ctx, &id, OrderStatus::Confirmed).unwrap();

        let order = ctx.local.store().get_order(&record_id(&id).unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.line_items.len(), 1);
        assert_eq!(order.line_items[0].quantity, 3);
        assert_eq!(order.total(), 4500);

        // Moving back to draft is not a lifecycle edge.
        assert!(status(&ctx, &id, OrderStatus::Draft).is_err());
    }
}
