pub mod alpaca_live;
