/// 指示灯抽象，与驱动它的引脚和极性无关
pub trait Led {
    fn on(&mut self);
    fn off(&mut self);
    fn toggle(&mut self);
    fn is_on(&mut self) -> bool;
}
