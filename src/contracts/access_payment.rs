use ethers::prelude::*;

// Access payment contract ABI: the payment event plus the public views
abigen!(
    AccessPayment,
    r#"[
        event PaymentReceived(address indexed user, uint256 amount, uint256 newExpirationDate)
        event PriceUpdated(uint256 newPrice)
        function price() view returns (uint256)
        function expirationDates(address user) view returns (uint256)
        function hasActiveAccess(address user) view returns (bool)
    ]"#
);
