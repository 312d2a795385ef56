//! Paper order construction and cost-basis arithmetic.

use chrono::Utc;

use crate::types::{Direction, Order};

pub struct TradingService;

impl TradingService {
    pub fn buy(symbol: &str, price: f64, quantity: f64) -> Order {
        Self::order(symbol, price, quantity, Direction::Buy)
    }

    pub fn sell(symbol: &str, price: f64, quantity: f64) -> Order {
        Self::order(symbol, price, quantity, Direction::Sell)
    }

    fn order(symbol: &str, price: f64, quantity: f64, direction: Direction) -> Order {
        Order {
            timestamp: Utc::now(),
            price,
            quantity,
            symbol: symbol.to_string(),
            direction,
        }
    }

    /// Quantity-weighted average entry price after adding a fill:
    /// `((C * Q) + (P * q)) / (Q + q)`, or 0 when the new total is 0.
    pub fn cost_basis(
        current_cost_basis: f64,
        total_quantity: f64,
        fill_quantity: f64,
        fill_price: f64,
    ) -> f64 {
        let new_total = total_quantity + fill_quantity;
        if new_total == 0.0 {
            return 0.0;
        }
        (current_cost_basis * total_quantity + fill_price * fill_quantity) / new_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_basis_weighted_average() {
        assert_eq!(TradingService::cost_basis(100.0, 1.0, 1.0, 120.0), 110.0);
        assert_eq!(TradingService::cost_basis(100.0, 3.0, 1.0, 60.0), 90.0);
    }

    #[test]
    fn test_cost_basis_first_fill() {
        assert_eq!(TradingService::cost_basis(0.0, 0.0, 2.0, 50.0), 50.0);
    }

    #[test]
    fn test_cost_basis_zero_total() {
        assert_eq!(TradingService::cost_basis(100.0, 0.0, 0.0, 50.0), 0.0);
    }

    #[test]
    fn test_orders_carry_direction() {
        let buy = TradingService::buy("BTC", 100.0, 1.5);
        assert_eq!(buy.direction, Direction::Buy);
        assert_eq!(buy.quantity, 1.5);
        let sell = TradingService::sell("BTC", 130.0, 1.5);
        assert_eq!(sell.direction, Direction::Sell);
        assert_eq!(sell.price, 130.0);
    }
}
