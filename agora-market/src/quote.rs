//! Pricing a unit of work from its text.
//!
//! A provider quotes an inbound request by word count: the price is the
//! larger of a base price and a per-word rate, the delivery estimate is a
//! base handling time plus throughput. All money math happens in integer
//! micro-units.

use agora::amount::{MicroAmount, Price};
use serde::{Deserialize, Serialize};

/// A provider's pricing policy for quoted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCard {
    /// Minimum charge per order.
    pub base_price: Price,
    /// Charge per word of input.
    pub per_word: Price,
    /// Fixed handling time in minutes.
    pub base_minutes: u32,
    /// Throughput used for the delivery estimate.
    pub words_per_minute: u32,
}

impl RateCard {
    /// Quotes the given request text.
    #[must_use]
    pub fn quote_for_text(&self, text: &str) -> WorkQuote {
        let word_count = text.split_whitespace().count();
        let words = u64::try_from(word_count).unwrap_or(u64::MAX);

        let by_words = MicroAmount::from_raw(
            words.saturating_mul(self.per_word.micros().as_u64()),
        );
        let micros = by_words.max(self.base_price.micros());

        let throughput = self.words_per_minute.max(1);
        let word_count_minutes =
            u32::try_from(words.div_ceil(u64::from(throughput))).unwrap_or(u32::MAX);
        let delivery_time_minutes = self.base_minutes.saturating_add(word_count_minutes);

        WorkQuote {
            price: Price::from_micros(micros),
            delivery_time_minutes,
            word_count,
        }
    }
}

impl Default for RateCard {
    /// Base 0.10 or 0.01 per word, 5 minutes plus 100 words per minute.
    fn default() -> Self {
        Self {
            base_price: Price::from_micros(MicroAmount::from_raw(100_000)),
            per_word: Price::from_micros(MicroAmount::from_raw(10_000)),
            base_minutes: 5,
            words_per_minute: 100,
        }
    }
}

/// A price and delivery estimate for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkQuote {
    /// Quoted price in whole currency units.
    pub price: Price,
    /// Estimated delivery time in minutes.
    pub delivery_time_minutes: u32,
    /// Words counted in the request text.
    pub word_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn short_requests_get_the_base_price() {
        let quote = RateCard::default().quote_for_text(&words(5));
        assert_eq!(quote.word_count, 5);
        assert_eq!(quote.price, "0.10".parse().unwrap());
        assert_eq!(quote.delivery_time_minutes, 6);
    }

    #[test]
    fn long_requests_are_priced_per_word() {
        let quote = RateCard::default().quote_for_text(&words(500));
        assert_eq!(quote.price, "5".parse().unwrap());
        assert_eq!(quote.delivery_time_minutes, 10);
    }

    #[test]
    fn the_crossover_point_is_the_base_price() {
        // 10 words at 0.01 each exactly meets the 0.10 base.
        let quote = RateCard::default().quote_for_text(&words(10));
        assert_eq!(quote.price, "0.10".parse().unwrap());

        let quote = RateCard::default().quote_for_text(&words(11));
        assert_eq!(quote.price, "0.11".parse().unwrap());
    }

    #[test]
    fn delivery_time_rounds_throughput_up() {
        let card = RateCard::default();
        assert_eq!(card.quote_for_text("").delivery_time_minutes, 5);
        assert_eq!(card.quote_for_text(&words(100)).delivery_time_minutes, 6);
        assert_eq!(card.quote_for_text(&words(101)).delivery_time_minutes, 7);
    }

    #[test]
    fn whitespace_does_not_count_as_words() {
        let quote = RateCard::default().quote_for_text("  one \t two \n three  ");
        assert_eq!(quote.word_count, 3);
    }
}
